// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Declaration and assertion macros for test-object authors.
//!
//! A test object calls [`bt_export!`] once, then declares its tests:
//!
//! ```ignore
//! butcher::bt_export!();
//!
//! butcher::bt_test!(foosuite, empty, (_object) {
//!     butcher::BT_RESULT_OK
//! });
//!
//! butcher::bt_test_fixture!(foosuite, buffered,
//!     setup(out) {
//!         *out = Box::into_raw(Box::new([0u8; 1024])).cast();
//!         butcher::BT_RESULT_OK
//!     },
//!     test(object) {
//!         butcher::bt_assert!(!object.is_null());
//!         butcher::BT_RESULT_OK
//!     },
//!     teardown(object, out) {
//!         drop(Box::from_raw(object.cast::<[u8; 1024]>()));
//!         *out = std::ptr::null_mut();
//!         butcher::BT_RESULT_OK
//!     });
//! ```
//!
//! Each declaration places a [`crate::FnDescriptor`] record into the
//! `bexec` section; the fixture form emits the setup and teardown records
//! next to the test record, all three sharing the test's name.

/// Anchors the `bexec` section.
///
/// References the two bracket symbols from a kept static so the linker
/// materializes them and keeps the section alive. Call it exactly once
/// per test object.
#[macro_export]
macro_rules! bt_export {
    () => {
        const _: () = {
            extern "C" {
                #[link_name = "__start_bexec"]
                static START: $crate::FnDescriptor;
                #[link_name = "__stop_bexec"]
                static STOP: $crate::FnDescriptor;
            }
            #[used]
            static EXPORT_BEXEC: [&'static $crate::FnDescriptor; 2] =
                unsafe { [&START, &STOP] };
        };
    };
}

/// Declares a plain test: no fixture, both callable arguments unused.
#[macro_export]
macro_rules! bt_test {
    ($suite:ident, $name:ident, ($object:pat_param) $body:block) => {
        const _: () = {
            unsafe extern "C" fn run(
                $object: *mut ::std::ffi::c_void,
                _out: *mut *mut ::std::ffi::c_void,
            ) -> ::std::ffi::c_int {
                $body
            }

            #[used]
            #[link_section = "bexec"]
            static TEST: $crate::FnDescriptor = $crate::FnDescriptor {
                name: concat!(stringify!($name), "\0").as_ptr().cast(),
                extra: concat!(stringify!($suite), "\0").as_ptr().cast(),
                flags: $crate::FnKind::PlainTest as usize,
                function: run,
            };
        };
    };
}

/// Declares a fixtured test with its setup and teardown.
///
/// The setup receives a null object and stores the fixture through its
/// out-pointer; the test and the teardown receive whatever the previous
/// phase stored.
#[macro_export]
macro_rules! bt_test_fixture {
    ($suite:ident, $name:ident,
     setup($setup_out:pat_param) $setup:block,
     test($test_object:pat_param) $test:block,
     teardown($teardown_object:pat_param, $teardown_out:pat_param) $teardown:block) => {
        const _: () = {
            unsafe extern "C" fn setup(
                _object: *mut ::std::ffi::c_void,
                $setup_out: *mut *mut ::std::ffi::c_void,
            ) -> ::std::ffi::c_int {
                $setup
            }

            unsafe extern "C" fn run(
                $test_object: *mut ::std::ffi::c_void,
                _out: *mut *mut ::std::ffi::c_void,
            ) -> ::std::ffi::c_int {
                $test
            }

            unsafe extern "C" fn teardown(
                $teardown_object: *mut ::std::ffi::c_void,
                $teardown_out: *mut *mut ::std::ffi::c_void,
            ) -> ::std::ffi::c_int {
                $teardown
            }

            #[used]
            #[link_section = "bexec"]
            static SETUP: $crate::FnDescriptor = $crate::FnDescriptor {
                name: concat!(stringify!($name), "\0").as_ptr().cast(),
                extra: concat!(stringify!($suite), "\0").as_ptr().cast(),
                flags: $crate::FnKind::Setup as usize,
                function: setup,
            };

            #[used]
            #[link_section = "bexec"]
            static TEARDOWN: $crate::FnDescriptor = $crate::FnDescriptor {
                name: concat!(stringify!($name), "\0").as_ptr().cast(),
                extra: concat!(stringify!($suite), "\0").as_ptr().cast(),
                flags: $crate::FnKind::Teardown as usize,
                function: teardown,
            };

            #[used]
            #[link_section = "bexec"]
            static TEST: $crate::FnDescriptor = $crate::FnDescriptor {
                name: concat!(stringify!($name), "\0").as_ptr().cast(),
                extra: concat!(stringify!($suite), "\0").as_ptr().cast(),
                flags: $crate::FnKind::FixturedTest as usize,
                function: run,
            };
        };
    };
}

/// Writes a log line; the harness captures it into the test's log.
#[macro_export]
macro_rules! bt_log {
    ($($arg:tt)*) => {
        ::std::println!($($arg)*)
    };
}

/// Fails the enclosing test when the condition does not hold.
#[macro_export]
macro_rules! bt_assert {
    ($cond:expr) => {
        if !($cond) {
            $crate::bt_log!(
                "{}:{}: assertion {} failed",
                ::std::file!(),
                ::std::line!(),
                ::std::stringify!($cond)
            );
            return $crate::BT_RESULT_FAIL;
        }
    };
}

#[macro_export]
macro_rules! bt_assert_int_equal {
    ($actual:expr, $expected:expr) => {{
        let actual = ($actual) as i64;
        let expected = ($expected) as i64;
        if actual != expected {
            $crate::bt_log!(
                "{}:{}: expected {} to be {}, got {}",
                ::std::file!(),
                ::std::line!(),
                ::std::stringify!($actual),
                expected,
                actual
            );
            return $crate::BT_RESULT_FAIL;
        }
    }};
}

#[macro_export]
macro_rules! bt_assert_int_not_equal {
    ($actual:expr, $expected:expr) => {{
        let actual = ($actual) as i64;
        let expected = ($expected) as i64;
        if actual == expected {
            $crate::bt_log!(
                "{}:{}: expected {} not to be {}",
                ::std::file!(),
                ::std::line!(),
                ::std::stringify!($actual),
                expected
            );
            return $crate::BT_RESULT_FAIL;
        }
    }};
}

#[macro_export]
macro_rules! bt_assert_ptr_not_equal {
    ($actual:expr, $expected:expr) => {{
        let actual = ($actual) as *const ::std::ffi::c_void;
        let expected = ($expected) as *const ::std::ffi::c_void;
        if ::std::ptr::eq(actual, expected) {
            $crate::bt_log!(
                "{}:{}: expected {} not to be {:p}",
                ::std::file!(),
                ::std::line!(),
                ::std::stringify!($actual),
                expected
            );
            return $crate::BT_RESULT_FAIL;
        }
    }};
}
