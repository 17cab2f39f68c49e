// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

fn main() {
    // The harness resolves the linker-synthesized bracket symbols with
    // dlsym; rustc's cdylib export list would keep them local otherwise.
    println!("cargo:rustc-cdylib-link-arg=-Wl,--export-dynamic-symbol=__start_bexec");
    println!("cargo:rustc-cdylib-link-arg=-Wl,--export-dynamic-symbol=__stop_bexec");
}
