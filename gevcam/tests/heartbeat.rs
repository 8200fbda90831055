/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Control privilege and heartbeat supervisor scenarios.

mod common;

use std::{
    net::{Ipv4Addr, SocketAddrV4},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use gevcam::{gige::ControlHandle, DeviceControl};

use common::{CameraState, MockCamera, CCP_REGISTER};

fn fast_heartbeat_state() -> CameraState {
    let mut state = CameraState::gige_defaults();
    // 300 ms heartbeat timeout gives a 100 ms supervisor period.
    state.regs.insert(0x0938, 300);
    state
}

fn connect(mock: &MockCamera) -> ControlHandle {
    ControlHandle::connect(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), mock.addr).unwrap()
}

#[test]
fn test_take_and_leave_control() {
    let mock = MockCamera::spawn();
    let mut handle = connect(&mock);
    handle.open().unwrap();

    // Opening acquires the control privilege.
    assert!(handle.is_controller());
    assert_eq!(
        mock.state.lock().unwrap().regs.get(&CCP_REGISTER),
        Some(&0x8000_0000)
    );

    handle.leave_control().unwrap();
    assert!(!handle.is_controller());
    assert_eq!(mock.state.lock().unwrap().regs.get(&CCP_REGISTER), Some(&0));

    handle.take_control().unwrap();
    assert!(handle.is_controller());
    assert_eq!(
        mock.state.lock().unwrap().regs.get(&CCP_REGISTER),
        Some(&0x8000_0000)
    );

    handle.close().unwrap();
}

#[test]
fn test_close_releases_control() {
    let mock = MockCamera::spawn();
    let mut handle = connect(&mock);
    handle.open().unwrap();
    assert!(handle.is_controller());

    handle.close().unwrap();
    assert!(!handle.is_controller());
    assert_eq!(mock.state.lock().unwrap().regs.get(&CCP_REGISTER), Some(&0));
}

#[test]
fn test_heartbeat_fires_control_lost_once() {
    let mock = MockCamera::spawn_with(fast_heartbeat_state());
    let mut handle = connect(&mock);

    let fired = Arc::new(AtomicUsize::new(0));
    {
        let fired = fired.clone();
        handle.set_control_lost_handler(move || {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }

    handle.open().unwrap();
    assert!(handle.is_controller());

    // Let a few probes observe healthy privilege first.
    thread::sleep(Duration::from_millis(350));
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(handle.is_controller());

    // Another application steals the channel: privilege reads back as 0.
    let revoked_at = Instant::now();
    mock.state.lock().unwrap().regs.insert(CCP_REGISTER, 0);

    while fired.load(Ordering::SeqCst) == 0 {
        assert!(revoked_at.elapsed() < Duration::from_millis(1200));
        thread::sleep(Duration::from_millis(10));
    }
    assert!(!handle.is_controller());

    // Exactly one event per loss: once the flag is cleared, the supervisor
    // stops probing.
    thread::sleep(Duration::from_millis(500));
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    handle.close().unwrap();
}

#[test]
fn test_heartbeat_quiet_while_privilege_held() {
    let mock = MockCamera::spawn_with(fast_heartbeat_state());
    let mut handle = connect(&mock);

    let fired = Arc::new(AtomicUsize::new(0));
    {
        let fired = fired.clone();
        handle.set_control_lost_handler(move || {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }

    handle.open().unwrap();
    thread::sleep(Duration::from_millis(600));

    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(handle.is_controller());
    // The supervisor has actually been probing the privilege register.
    assert!(
        mock.state
            .lock()
            .unwrap()
            .request_count(common::READ_REG_CMD, CCP_REGISTER)
            >= 3
    );

    handle.close().unwrap();
}

#[test]
fn test_set_heartbeat_timeout_writes_register() {
    let mock = MockCamera::spawn();
    let mut handle = connect(&mock);
    handle.open().unwrap();

    handle
        .set_heartbeat_timeout(Duration::from_millis(1500))
        .unwrap();
    assert_eq!(
        mock.state.lock().unwrap().regs.get(&0x0938),
        Some(&1500)
    );

    handle.close().unwrap();
}
