// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Test support for exercising the real binaries.
//!
//! The integration tests need the `butcher` and `bexec` executables plus
//! the `libfoo` test object as they would ship, not as rlibs, so this
//! crate drives cargo to build them and hands back the artifact paths.
//! Builds are cached for the lifetime of the test process; every test
//! gets the same artifacts without paying for a second build.
//!
//! Functions here assume they run inside a cargo test binary, which is
//! how they locate the target directory.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process;
use std::sync::Mutex;

use once_cell::sync::OnceCell;

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ArtifactType {
    /// A `[[bin]]` target, located by binary name.
    Bin,
    /// A `cdylib` package, located by `lib<name>.<ext>`.
    CDylib,
}

#[derive(Debug, PartialEq, Eq, Hash, Clone)]
pub struct ArtifactsBuild {
    /// Workspace package that owns the target.
    pub package: String,
    /// Binary or library name inside that package.
    pub name: String,
    pub artifact_type: ArtifactType,
}

impl ArtifactsBuild {
    pub fn bin(package: &str, name: &str) -> Self {
        ArtifactsBuild {
            package: package.to_owned(),
            name: name.to_owned(),
            artifact_type: ArtifactType::Bin,
        }
    }

    pub fn cdylib(package: &str) -> Self {
        ArtifactsBuild {
            package: package.to_owned(),
            name: package.to_owned(),
            artifact_type: ArtifactType::CDylib,
        }
    }
}

const DYLIB_EXTENSION: &str = if cfg!(target_os = "macos") {
    "dylib"
} else {
    "so"
};

fn inner_build_artifact(build: &ArtifactsBuild) -> anyhow::Result<PathBuf> {
    let mut cmd = process::Command::new(env!("CARGO"));
    cmd.arg("build").arg("-p").arg(&build.package);
    if let ArtifactType::Bin = build.artifact_type {
        cmd.arg("--bin").arg(&build.name);
    }

    let output = cmd.output()?;
    if !output.status.success() {
        anyhow::bail!(
            "cargo build -p {} failed: status {:?}\nstderr:\n{}",
            build.package,
            output.status.code(),
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let mut path = debug_artifact_dir()?.clone();
    match build.artifact_type {
        ArtifactType::Bin => path.push(&build.name),
        ArtifactType::CDylib => path.push(format!(
            "lib{}.{DYLIB_EXTENSION}",
            build.name.replace('-', "_")
        )),
    }
    anyhow::ensure!(path.exists(), "built artifact missing at {path:?}");
    Ok(path)
}

/// The `target/debug` directory, derived from the test binary's own
/// location: everything up to the `target` component, then `debug`.
fn debug_artifact_dir() -> anyhow::Result<&'static PathBuf> {
    static ARTIFACT_DIR: OnceCell<PathBuf> = OnceCell::new();
    ARTIFACT_DIR.get_or_try_init(|| {
        let test_bin = PathBuf::from(
            env::args()
                .next()
                .ok_or_else(|| anyhow::anyhow!("no argv[0]"))?,
        );
        let mut components = test_bin.components().rev().peekable();
        loop {
            let Some(c) = components.peek() else {
                anyhow::bail!("test binary {test_bin:?} is not under a target directory");
            };
            if c.as_os_str() == "target" {
                break;
            }
            components.next();
        }
        let mut dir: PathBuf = components.rev().collect();
        dir.push("debug");
        Ok(dir)
    })
}

/// Builds (or reuses) the given artifacts and returns their paths.
pub fn build_artifacts<'b>(
    builds: &[&'b ArtifactsBuild],
) -> anyhow::Result<HashMap<&'b ArtifactsBuild, PathBuf>> {
    static ARTIFACTS: OnceCell<Mutex<HashMap<ArtifactsBuild, PathBuf>>> = OnceCell::new();

    let cache = ARTIFACTS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut res = HashMap::new();
    for &build in builds {
        let mut cache = cache.lock().unwrap();
        if let Some(path) = cache.get(build) {
            res.insert(build, path.clone());
        } else {
            let path = inner_build_artifact(build)?;
            cache.insert(build.clone(), path.clone());
            res.insert(build, path);
        }
    }
    Ok(res)
}

/// The three artifacts every harness test wants.
pub struct HarnessArtifacts {
    pub butcher: PathBuf,
    pub bexec: PathBuf,
    pub libfoo: PathBuf,
}

impl HarnessArtifacts {
    pub fn build() -> anyhow::Result<Self> {
        let butcher = ArtifactsBuild::bin("butcher", "butcher");
        let bexec = ArtifactsBuild::bin("butcher", "bexec");
        let libfoo = ArtifactsBuild::cdylib("foo");
        let mut paths = build_artifacts(&[&butcher, &bexec, &libfoo])?;
        Ok(HarnessArtifacts {
            butcher: paths.remove(&butcher).unwrap(),
            bexec: paths.remove(&bexec).unwrap(),
            libfoo: paths.remove(&libfoo).unwrap(),
        })
    }

    /// Runs `butcher` with the standard `--bexec` wiring plus the given
    /// arguments, against the sample object.
    pub fn run_butcher(&self, args: &[&str]) -> anyhow::Result<process::Output> {
        let mut cmd = process::Command::new(&self.butcher);
        cmd.arg("--bexec").arg(&self.bexec);
        cmd.args(args);
        cmd.arg(&self.libfoo);
        Ok(cmd.output()?)
    }
}
