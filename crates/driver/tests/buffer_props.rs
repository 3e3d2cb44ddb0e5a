//! Property tests for inbound buffer bookkeeping

mod support;

use driver::DriverError;
use proptest::prelude::*;
use support::{attach_mock, open};

#[derive(Debug, Clone)]
enum Op {
    Read(usize),
    Complete(Vec<u8>),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1usize..100).prop_map(Op::Read),
        prop::collection::vec(any::<u8>(), 0..80).prop_map(Op::Complete),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_delivered_bytes_are_accepted_prefix(
        packet_size in 1u16..64,
        ops in prop::collection::vec(op(), 1..60),
    ) {
        let (mock, table, attachment) = attach_mock(packet_size, 64);
        let file = open(&table, &attachment, true);
        let device = attachment.device();

        let mut accepted = Vec::new();
        let mut delivered = Vec::new();
        let mut buf = [0u8; 128];

        for op in ops {
            match op {
                Op::Read(count) => match file.read(&mut buf, count) {
                    Ok(n) => {
                        prop_assert!(n >= 1 && n <= count);
                        delivered.extend_from_slice(&buf[..n]);
                    }
                    Err(DriverError::WouldBlock) => {}
                    Err(other) => prop_assert!(false, "unexpected error {other:?}"),
                },
                Op::Complete(data) => {
                    if mock.pending_inbound() > 0 {
                        let requested = *mock.inbound_submissions().last().unwrap();
                        prop_assert!(requested <= usize::from(packet_size));
                        accepted.extend_from_slice(&data[..data.len().min(requested)]);
                        mock.complete_inbound(&data);
                    }
                }
            }

            let state = device.buffer_state();
            prop_assert!(state.consumed <= state.filled);
            prop_assert!(state.filled <= state.capacity);
            prop_assert!(mock.pending_inbound() <= 1);
            prop_assert_eq!(delivered.len() + state.available(), accepted.len());
            prop_assert_eq!(&delivered[..], &accepted[..delivered.len()]);
        }
    }
}
