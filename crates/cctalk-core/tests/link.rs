//! Link-layer integration tests against the scripted fake device.

mod common;

use std::sync::{Arc, Mutex};

use cctalk_core::protocol::{Header, LinkController, ProtocolError};
use common::{FakeDevice, MockLink};

fn controller(device: &Arc<Mutex<FakeDevice>>) -> LinkController {
    LinkController::new(Box::new(MockLink::new(device.clone())), 2, false, false)
        .expect("controller starts")
}

#[test]
fn request_ids_are_monotonic_and_nonzero() {
    let device = Arc::new(Mutex::new(FakeDevice::coin_acceptor(2)));
    let mut link = controller(&device);

    let first = link.transfer(Header::SimplePoll, &[], None).expect("poll");
    let second = link.transfer(Header::SimplePoll, &[], None).expect("poll");
    assert_eq!(first.request_id, 1);
    assert_eq!(second.request_id, 2);
    assert!(first.is_ack());
}

#[test]
fn ascii_reply_passes_through_echo_stripping() {
    let device = Arc::new(Mutex::new(FakeDevice::coin_acceptor(2)));
    let mut link = controller(&device);

    let reply = link
        .transfer(Header::GetEquipmentCategory, &[], None)
        .expect("category");
    assert_eq!(reply.payload, b"Coin Acceptor".to_vec());
}

#[test]
fn corrupted_checksum_is_a_structural_error() {
    let device = Arc::new(Mutex::new(FakeDevice::coin_acceptor(2)));
    device.lock().unwrap().corrupt_checksum = true;
    let mut link = controller(&device);

    let error = link
        .transfer(Header::SimplePoll, &[], None)
        .expect_err("should fail");
    assert!(matches!(error, ProtocolError::ChecksumMismatch));
}

#[test]
fn wrong_source_address_is_a_structural_error() {
    let device = Arc::new(Mutex::new(FakeDevice::coin_acceptor(2)));
    device.lock().unwrap().source_override = Some(9);
    let mut link = controller(&device);

    let error = link
        .transfer(Header::SimplePoll, &[], None)
        .expect_err("should fail");
    assert!(matches!(
        error,
        ProtocolError::BadSource {
            expected: 2,
            actual: 9
        }
    ));
}

#[test]
fn silent_device_leaves_only_the_echo() {
    // A dead device still echoes the transmission, so the captured reply is
    // empty and fails structural validation.
    let device = Arc::new(Mutex::new(FakeDevice::coin_acceptor(2)));
    device.lock().unwrap().silent = true;
    let mut link = controller(&device);

    let error = link
        .transfer(Header::SimplePoll, &[], None)
        .expect_err("should fail");
    assert!(matches!(error, ProtocolError::ReplyTooShort(0)));
}

#[test]
fn dead_line_times_out_with_request_number() {
    let device = Arc::new(Mutex::new(FakeDevice::coin_acceptor(2)));
    device.lock().unwrap().silent = true;
    let mut mock = MockLink::new(device.clone());
    mock.echo = false;
    let mut link = LinkController::new(Box::new(mock), 2, false, false).expect("controller");

    let error = link
        .transfer(Header::SimplePoll, &[], None)
        .expect_err("should time out");
    assert!(matches!(error, ProtocolError::ResponseTimeout(1)));
    assert_eq!(error.to_string(), "Response #1 read timeout");
}

#[test]
fn refuses_des_encryption() {
    let device = Arc::new(Mutex::new(FakeDevice::coin_acceptor(2)));
    let mut link =
        LinkController::new(Box::new(MockLink::new(device.clone())), 2, false, true)
            .expect("controller");
    let error = link
        .transfer(Header::SimplePoll, &[], None)
        .expect_err("should refuse");
    assert!(matches!(error, ProtocolError::EncryptionUnsupported));
}

#[test]
fn refuses_16_bit_checksums() {
    let device = Arc::new(Mutex::new(FakeDevice::coin_acceptor(2)));
    let mut link =
        LinkController::new(Box::new(MockLink::new(device.clone())), 2, true, false)
            .expect("controller");
    let error = link
        .transfer(Header::SimplePoll, &[], None)
        .expect_err("should refuse");
    assert!(matches!(error, ProtocolError::Checksum16Unsupported));
}

#[test]
fn oversized_payload_is_refused() {
    let device = Arc::new(Mutex::new(FakeDevice::coin_acceptor(2)));
    let mut link = controller(&device);
    let data = vec![0u8; 256];
    let error = link
        .transfer(Header::SetInhibitStatus, &data, None)
        .expect_err("should refuse");
    assert!(matches!(error, ProtocolError::PayloadTooLarge(256)));
}
