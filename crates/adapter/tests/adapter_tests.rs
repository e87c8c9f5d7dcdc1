//! Integration tests for the typed adapter operations
//!
//! Runs every operation against the recording mock backend and checks both
//! the results and the exact native calls made, including which calls are
//! skipped or made when a step fails.

use common::{
    CONTROL_TIMEOUTS, ControlSetup, MatchCriteria, NativeError, NativeStep, PIPE_TIMEOUTS,
    PipeDirection, ServiceClass, TransferKind, UsbError,
};
use usb_adapter::UsbAdapter;
use usb_adapter::test_utils::{
    MockBackend, MockCall, MockDevice, STLINK_PRODUCT_ID, STLINK_VENDOR_ID, create_mock_pipe,
    create_mock_stlink,
};

fn setup() -> (MockBackend, UsbAdapter<MockBackend>) {
    let backend = MockBackend::new().with_device(create_mock_stlink());
    let adapter = UsbAdapter::new(backend.clone());
    (backend, adapter)
}

/// The failing step of an operation that was expected to fail
fn failed_step<T>(result: Result<T, UsbError>) -> Option<NativeStep> {
    match result {
        Ok(_) => panic!("operation unexpectedly succeeded"),
        Err(e) => e.step(),
    }
}

fn get_descriptor(length: u16) -> ControlSetup {
    ControlSetup {
        request_type: 0x80,
        request: 6,
        value: 0x0100,
        index: 0,
        length,
    }
}

mod find_and_close {
    use super::*;

    #[test]
    fn test_find_opens_interface_zero() {
        let (backend, adapter) = setup();

        let handle = adapter
            .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");
        assert!(handle.native().open);

        assert_eq!(
            backend.calls(),
            vec![
                MockCall::MatchingService(MatchCriteria::interface(
                    STLINK_VENDOR_ID,
                    STLINK_PRODUCT_ID
                )),
                MockCall::CreatePlugin {
                    device: 0,
                    class: ServiceClass::Interface,
                },
                MockCall::QueryInterface { device: 0 },
                MockCall::ReleasePlugin { device: 0 },
                MockCall::OpenInterface { device: 0 },
            ]
        );
    }

    #[test]
    fn test_close_closes_then_releases() {
        let (backend, adapter) = setup();
        let handle = adapter
            .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");
        backend.clear_calls();

        adapter.close(handle).unwrap();

        assert_eq!(
            backend.calls(),
            vec![
                MockCall::CloseInterface { device: 0 },
                MockCall::ReleaseInterface { device: 0 },
            ]
        );
    }

    #[test]
    fn test_absent_device_is_not_an_error() {
        let (backend, adapter) = setup();

        let found = adapter.find_device(0xffff, 0xffff).unwrap();
        assert!(found.is_none());

        // Nothing beyond the match when no service exists
        assert_eq!(backend.calls().len(), 1);
    }

    #[test]
    fn test_wrong_configuration_not_found() {
        let backend =
            MockBackend::new().with_device(create_mock_stlink().with_configuration(2));
        let adapter = UsbAdapter::new(backend);

        assert!(
            adapter
                .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_missing_interface_zero_not_found() {
        let backend = MockBackend::new().with_device(create_mock_stlink().with_interfaces(vec![1]));
        let adapter = UsbAdapter::new(backend);

        assert!(
            adapter
                .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_first_matching_device_wins() {
        let backend = MockBackend::new()
            .with_device(MockDevice::new(0x1234, 0x5678))
            .with_device(create_mock_stlink().with_address(2, 7))
            .with_device(create_mock_stlink().with_address(3, 9));
        let adapter = UsbAdapter::new(backend);

        let handle = adapter
            .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");
        assert_eq!(handle.native().device, 1);
    }

    #[test]
    fn test_repeated_find_close_cycles() {
        let (backend, adapter) = setup();

        for _ in 0..3 {
            let handle = adapter
                .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
                .unwrap()
                .expect("device attached");
            adapter.close(handle).unwrap();
        }

        let opens = backend
            .calls()
            .iter()
            .filter(|call| matches!(call, MockCall::OpenInterface { .. }))
            .count();
        let releases = backend
            .calls()
            .iter()
            .filter(|call| matches!(call, MockCall::ReleaseInterface { .. }))
            .count();
        assert_eq!(opens, 3);
        assert_eq!(releases, 3);
    }
}

mod lookup_failures {
    use super::*;

    #[test]
    fn test_service_matching_failure() {
        let (backend, adapter) = setup();
        backend.fail(NativeStep::ServiceMatching, NativeError::Io);

        let result = adapter.find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID);
        assert_eq!(failed_step(result), Some(NativeStep::ServiceMatching));
    }

    #[test]
    fn test_plugin_creation_failure() {
        let (backend, adapter) = setup();
        backend.fail(NativeStep::CreatePlugin, NativeError::Access);

        let result = adapter.find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID);
        assert_eq!(failed_step(result), Some(NativeStep::CreatePlugin));
        assert!(
            !backend
                .calls()
                .iter()
                .any(|call| matches!(call, MockCall::ReleasePlugin { .. }))
        );
    }

    #[test]
    fn test_failed_query_still_releases_plugin() {
        let (backend, adapter) = setup();
        backend.fail(NativeStep::QueryInterface, NativeError::Other {
            message: "no such interface".to_string(),
        });

        let result = adapter.find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID);
        assert_eq!(failed_step(result), Some(NativeStep::QueryInterface));
        assert_eq!(
            backend.calls().last(),
            Some(&MockCall::ReleasePlugin { device: 0 })
        );
    }

    #[test]
    fn test_open_failure_releases_interface() {
        let (backend, adapter) = setup();
        backend.fail(NativeStep::InterfaceOpen, NativeError::Busy);

        let result = adapter.find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID);
        assert_eq!(failed_step(result), Some(NativeStep::InterfaceOpen));
        assert_eq!(
            backend.calls().last(),
            Some(&MockCall::ReleaseInterface { device: 0 })
        );
    }

    #[test]
    fn test_close_failure_skips_release() {
        let (backend, adapter) = setup();
        let handle = adapter
            .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");
        backend.clear_calls();
        backend.fail(NativeStep::InterfaceClose, NativeError::Io);

        let (handle, err) = adapter.close(handle).unwrap_err();
        assert_eq!(err.step(), Some(NativeStep::InterfaceClose));
        assert!(handle.native().open);
        assert_eq!(
            backend.calls(),
            vec![MockCall::CloseInterface { device: 0 }]
        );
    }

    #[test]
    fn test_close_retry_after_failure() {
        let (backend, adapter) = setup();
        let handle = adapter
            .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");
        backend.fail(NativeStep::InterfaceClose, NativeError::Busy);

        let (handle, _err) = adapter.close(handle).unwrap_err();
        backend.clear_failures();
        adapter.close(handle).unwrap();

        let releases = backend
            .calls()
            .iter()
            .filter(|call| matches!(call, MockCall::ReleaseInterface { .. }))
            .count();
        assert_eq!(releases, 1);
    }

    #[test]
    fn test_message_names_only_the_step() {
        let (backend, adapter) = setup();
        backend.fail(NativeStep::InterfaceOpen, NativeError::Access);

        let Err(err) = adapter.find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID) else {
            panic!("open should fail");
        };
        assert_eq!(err.to_string(), "interface open failed");
    }
}

mod control {
    use super::*;

    const DEVICE_DESCRIPTOR: [u8; 18] = [
        0x12, 0x01, 0x00, 0x02, 0xef, 0x02, 0x01, 0x40, 0x83, 0x04, 0x40, 0x57, 0x00, 0x01,
        0x01, 0x02, 0x03, 0x01,
    ];

    #[test]
    fn test_in_request_returns_data() {
        let backend = MockBackend::new()
            .with_device(create_mock_stlink().with_control_response(&DEVICE_DESCRIPTOR));
        let adapter = UsbAdapter::new(backend.clone());
        let mut handle = adapter
            .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");

        let mut buffer = [0u8; 64];
        let count = adapter
            .control(&mut handle, get_descriptor(18), &mut buffer)
            .unwrap();

        assert_eq!(count, 18);
        assert_eq!(&buffer[..18], &DEVICE_DESCRIPTOR);
        assert!(buffer[18..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_count_never_exceeds_length() {
        let backend = MockBackend::new()
            .with_device(create_mock_stlink().with_control_response(&DEVICE_DESCRIPTOR));
        let adapter = UsbAdapter::new(backend);
        let mut handle = adapter
            .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");

        let mut buffer = [0u8; 64];
        let count = adapter
            .control(&mut handle, get_descriptor(8), &mut buffer)
            .unwrap();

        assert_eq!(count, 8);
        assert!(buffer[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_control_uses_control_timeouts() {
        let (backend, adapter) = setup();
        let mut handle = adapter
            .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");

        let mut buffer = [0u8; 18];
        adapter
            .control(&mut handle, get_descriptor(18), &mut buffer)
            .unwrap();

        assert_eq!(
            backend.calls().last(),
            Some(&MockCall::ControlRequest {
                device: 0,
                setup: get_descriptor(18),
                timeouts: CONTROL_TIMEOUTS,
            })
        );
        assert_eq!(CONTROL_TIMEOUTS.no_data.as_millis(), 1000);
        assert_eq!(CONTROL_TIMEOUTS.completion.as_millis(), 4000);
    }

    #[test]
    fn test_zero_length_out_request() {
        let (_backend, adapter) = setup();
        let mut handle = adapter
            .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");

        let set_configuration = ControlSetup {
            request_type: 0x00,
            request: 9,
            value: 1,
            index: 0,
            length: 0,
        };
        let count = adapter
            .control(&mut handle, set_configuration, &mut [])
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_buffer_shorter_than_length() {
        let (backend, adapter) = setup();
        let mut handle = adapter
            .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");
        backend.clear_calls();

        let mut buffer = [0u8; 4];
        let err = adapter
            .control(&mut handle, get_descriptor(18), &mut buffer)
            .unwrap_err();

        assert!(matches!(
            err,
            UsbError::BufferTooSmall {
                needed: 18,
                available: 4
            }
        ));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_control_failure() {
        let (backend, adapter) = setup();
        let mut handle = adapter
            .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");
        backend.fail(NativeStep::ControlRequest, NativeError::Pipe);

        let mut buffer = [0u8; 18];
        let err = adapter
            .control(&mut handle, get_descriptor(18), &mut buffer)
            .unwrap_err();
        assert_eq!(err.step(), Some(NativeStep::ControlRequest));
        assert_eq!(err.to_string(), "control request failed");
    }
}

mod pipes {
    use super::*;

    #[test]
    fn test_read_returns_at_most_size() {
        let backend =
            MockBackend::new().with_device(create_mock_stlink().with_read_data(&[0xaa; 100]));
        let adapter = UsbAdapter::new(backend);
        let mut handle = adapter
            .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");

        let mut buffer = [0u8; 64];
        assert_eq!(adapter.read(&mut handle, 1, &mut buffer).unwrap(), 64);
        assert_eq!(adapter.read(&mut handle, 1, &mut buffer).unwrap(), 36);
        assert_eq!(adapter.read(&mut handle, 1, &mut buffer).unwrap(), 0);
    }

    #[test]
    fn test_read_uses_pipe_timeouts() {
        let (backend, adapter) = setup();
        let mut handle = adapter
            .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");
        backend.queue_read_data(0, &[1, 2, 3]);

        let mut buffer = [0u8; 16];
        let count = adapter.read(&mut handle, 1, &mut buffer).unwrap();
        assert_eq!(&buffer[..count], &[1, 2, 3]);

        assert_eq!(
            backend.calls().last(),
            Some(&MockCall::ReadPipe {
                device: 0,
                pipe: 1,
                size: 16,
                timeouts: PIPE_TIMEOUTS,
            })
        );
        assert_eq!(PIPE_TIMEOUTS.no_data.as_millis(), 100);
        assert_eq!(PIPE_TIMEOUTS.completion.as_millis(), 400);
    }

    #[test]
    fn test_read_from_out_pipe_fails() {
        let (_backend, adapter) = setup();
        let mut handle = adapter
            .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");

        let mut buffer = [0u8; 16];
        let err = adapter.read(&mut handle, 2, &mut buffer).unwrap_err();
        assert_eq!(err.step(), Some(NativeStep::ReadPipe));
    }

    #[test]
    fn test_write_sends_all_bytes() {
        let (backend, adapter) = setup();
        let mut handle = adapter
            .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");

        adapter.write(&mut handle, 2, &[0xf1, 0x80]).unwrap();

        assert_eq!(backend.written(), vec![(2, vec![0xf1, 0x80])]);
        assert!(matches!(
            backend.calls().last(),
            Some(MockCall::WritePipe { timeouts, .. }) if *timeouts == PIPE_TIMEOUTS
        ));
    }

    #[test]
    fn test_write_failure() {
        let (backend, adapter) = setup();
        let mut handle = adapter
            .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");
        backend.fail(NativeStep::WritePipe, NativeError::Timeout);

        let err = adapter.write(&mut handle, 2, &[0x00]).unwrap_err();
        assert_eq!(err.step(), Some(NativeStep::WritePipe));
    }

    #[test]
    fn test_pipe_zero_is_control_pipe() {
        let (backend, adapter) = setup();
        let handle = adapter
            .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");

        backend.clear_calls();

        let control = adapter.pipe_properties(&handle, 0).unwrap();
        assert_eq!(
            backend.calls(),
            vec![MockCall::PipeProperties { device: 0, pipe: 0 }]
        );
        assert_eq!(control.direction, PipeDirection::Any);
        assert_eq!(control.number, 0);
        assert_eq!(control.transfer_type, TransferKind::Control);
        assert_eq!(control.max_packet_size, 64);
    }

    #[test]
    fn test_pipe_table() {
        let backend = MockBackend::new().with_device(create_mock_stlink().with_pipes(vec![
            create_mock_pipe(PipeDirection::In, 1, TransferKind::Bulk),
            create_mock_pipe(PipeDirection::Out, 2, TransferKind::Bulk),
            create_mock_pipe(PipeDirection::In, 3, TransferKind::Interrupt),
        ]));
        let adapter = UsbAdapter::new(backend);
        let handle = adapter
            .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");

        assert_eq!(adapter.pipe_count(&handle).unwrap(), 3);

        let pipes = adapter.pipes(&handle).unwrap();
        assert_eq!(pipes.len(), 4);
        assert_eq!(pipes[0].transfer_type, TransferKind::Control);
        assert_eq!(pipes[3].transfer_type, TransferKind::Interrupt);
        assert_eq!(pipes[3].interval, 10);
    }

    #[test]
    fn test_pipe_out_of_range() {
        let (_backend, adapter) = setup();
        let handle = adapter
            .find_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");

        let err = adapter.pipe_properties(&handle, 9).unwrap_err();
        assert_eq!(err.step(), Some(NativeStep::GetPipeProperties));
    }
}

mod whole_device {
    use super::*;

    #[test]
    fn test_find_does_not_open() {
        let (backend, adapter) = setup();

        let device = adapter
            .find_whole_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");
        assert_eq!(device.native().device, 0);

        assert_eq!(
            backend.calls(),
            vec![
                MockCall::MatchingService(MatchCriteria::device(
                    STLINK_VENDOR_ID,
                    STLINK_PRODUCT_ID
                )),
                MockCall::CreatePlugin {
                    device: 0,
                    class: ServiceClass::Device,
                },
                MockCall::QueryDevice { device: 0 },
                MockCall::ReleasePlugin { device: 0 },
            ]
        );
    }

    #[test]
    fn test_any_configuration_matches() {
        let backend = MockBackend::new().with_device(
            create_mock_stlink()
                .with_configuration(2)
                .with_interfaces(vec![]),
        );
        let adapter = UsbAdapter::new(backend);

        assert!(
            adapter
                .find_whole_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
                .unwrap()
                .is_some()
        );
    }

    #[test]
    fn test_absent_device() {
        let (_backend, adapter) = setup();
        assert!(adapter.find_whole_device(0xffff, 0xffff).unwrap().is_none());
    }

    #[test]
    fn test_close_only_releases() {
        let (backend, adapter) = setup();
        let device = adapter
            .find_whole_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");
        backend.clear_calls();

        adapter.close_device(device);

        assert_eq!(backend.calls(), vec![MockCall::ReleaseDevice { device: 0 }]);
    }

    #[test]
    fn test_device_request() {
        let backend = MockBackend::new()
            .with_device(create_mock_stlink().with_control_response(&[0x12, 0x01]));
        let adapter = UsbAdapter::new(backend.clone());
        let mut device = adapter
            .find_whole_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");

        let mut buffer = [0u8; 2];
        adapter
            .device_request(&mut device, get_descriptor(2), &mut buffer)
            .unwrap();

        assert_eq!(buffer, [0x12, 0x01]);
        assert_eq!(
            backend.calls().last(),
            Some(&MockCall::DeviceRequest {
                device: 0,
                setup: get_descriptor(2),
            })
        );
    }

    #[test]
    fn test_device_request_failure() {
        let (backend, adapter) = setup();
        let mut device = adapter
            .find_whole_device(STLINK_VENDOR_ID, STLINK_PRODUCT_ID)
            .unwrap()
            .expect("device attached");
        backend.fail(NativeStep::DeviceRequest, NativeError::NoDevice);

        let mut buffer = [0u8; 18];
        let err = adapter
            .device_request(&mut device, get_descriptor(18), &mut buffer)
            .unwrap_err();
        assert_eq!(err.step(), Some(NativeStep::DeviceRequest));
        assert_eq!(err.to_string(), "device request failed");
    }
}

mod listing {
    use super::*;

    #[test]
    fn test_list_devices() {
        let backend = MockBackend::new()
            .with_device(create_mock_stlink().with_address(1, 4))
            .with_device(MockDevice::new(0x0403, 0x6001).with_address(2, 3));
        let adapter = UsbAdapter::new(backend);

        let devices = adapter.list_devices().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].vendor_id, STLINK_VENDOR_ID);
        assert_eq!(devices[1].bus_number, 2);
        assert_eq!(devices[1].address, 3);
    }

    #[test]
    fn test_list_failure() {
        let (backend, adapter) = setup();
        backend.fail(NativeStep::ServiceMatching, NativeError::Io);

        let err = adapter.list_devices().unwrap_err();
        assert_eq!(err.step(), Some(NativeStep::ServiceMatching));
    }
}
