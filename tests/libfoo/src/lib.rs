// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Sample test object. Every flavor of outcome the harness knows is
//! represented here so the end-to-end tests can drive them all.

#![cfg(unix)]

use butcher::{
    bt_assert, bt_export, bt_log, bt_test, bt_test_fixture, BT_RESULT_IGNORE, BT_RESULT_OK,
};

bt_export!();

bt_test!(foosuite, empty, (_object) {
    BT_RESULT_OK
});

bt_test!(foosuite, sigsegv, (_object) {
    let ptr = std::ptr::null_mut::<i32>();
    *ptr = 42;
    BT_RESULT_OK
});

bt_test!(foosuite, longtest, (_object) {
    for _ in 0..100 {
        std::thread::sleep(std::time::Duration::from_micros(100));
    }
    BT_RESULT_OK
});

bt_test!(foosuite, logging, (_object) {
    bt_log!("entered the logging test");
    bt_log!("leaving the logging test");
    BT_RESULT_OK
});

bt_test_fixture!(foosuite, buffered,
    setup(out) {
        bt_log!("entered setup");
        let buffer: Box<[u8; 1024]> = Box::new([0; 1024]);
        *out = Box::into_raw(buffer).cast();
        bt_log!("leaving setup");
        BT_RESULT_OK
    },
    test(object) {
        bt_assert!(!object.is_null());
        BT_RESULT_OK
    },
    teardown(object, out) {
        bt_log!("entered teardown");
        drop(Box::from_raw(object.cast::<[u8; 1024]>()));
        *out = std::ptr::null_mut();
        bt_log!("leaving teardown");
        BT_RESULT_OK
    });

bt_test_fixture!(foosuite, skipped,
    setup(_out) {
        BT_RESULT_IGNORE
    },
    test(_object) {
        bt_log!("this test is never reached");
        BT_RESULT_OK
    },
    teardown(_object, _out) {
        bt_log!("this teardown is never reached");
        BT_RESULT_OK
    });

bt_test!(barsuite, always_fails, (_object) {
    bt_assert!(1 + 1 == 3);
    BT_RESULT_OK
});

bt_test!(barsuite, also_empty, (_object) {
    BT_RESULT_OK
});
