//! Property-based tests for pulsetx
//!
//! Uses proptest to verify invariants across large input spaces.

use proptest::prelude::*;

// ============================================================================
// Checksum Properties
// ============================================================================

mod checksum_properties {
    use super::*;
    use pulsetx_core::checksum::{internet_checksum, update_checksum, verify_checksum};
    use pulsetx_core::packet::checksums_valid;
    use pulsetx_core::{GeneratorConfig, MacAddr, PacketTemplate, Stamp, VlanTag};
    use std::net::Ipv4Addr;

    fn arb_config() -> impl Strategy<Value = GeneratorConfig> {
        (
            64u32..=1518,
            prop::option::of((1u16..=4095, 0u8..=7)),
            any::<bool>(),
            any::<u32>(),
            any::<[u8; 4]>(),
            any::<[u8; 4]>(),
            any::<u16>(),
            any::<u16>(),
            any::<[u8; 6]>(),
        )
            .prop_map(
                |(packet_size, vlan, timestamp, fill_pattern, src, dst, sport, dport, mac)| {
                    GeneratorConfig {
                        packet_size,
                        vlan: vlan.map(|(id, priority)| VlanTag { id, priority }),
                        timestamp,
                        fill_pattern,
                        src_ip: Ipv4Addr::from(src),
                        dst_ip: Ipv4Addr::from(dst),
                        src_port: sport,
                        dst_port: dport,
                        dst_mac: MacAddr(mac),
                        ..Default::default()
                    }
                },
            )
    }

    fn arb_stamp() -> impl Strategy<Value = Stamp> {
        prop_oneof![
            (any::<u32>(), any::<u32>(), 0u32..1_000_000)
                .prop_map(|(seq, sec, usec)| Stamp::Trailer { seq, sec, usec }),
            (any::<u32>(), any::<u32>()).prop_map(|(cycle, frame)| Stamp::Marker { cycle, frame }),
        ]
    }

    proptest! {
        /// Every generated packet validates: IPv4 and UDP checksums sum to zero
        #[test]
        fn generated_packets_validate(config in arb_config()) {
            let template = PacketTemplate::new(&config);
            prop_assert_eq!(template.bytes().len() as u32, config.wire_len());
            prop_assert!(checksums_valid(template.layout(), template.bytes()));
        }

        /// Per-cycle stamping keeps checksums valid and never touches headers
        #[test]
        fn refresh_preserves_checksum_law(
            config in arb_config(),
            stamps in prop::collection::vec(arb_stamp(), 1..8),
        ) {
            let template = PacketTemplate::new(&config);
            let layout = *template.layout();
            let mut packet = template.bytes().to_vec();
            for stamp in stamps {
                template.refresh(&mut packet, stamp);
                prop_assert!(checksums_valid(&layout, &packet));
            }
            // Everything before the UDP checksum field is untouched
            prop_assert_eq!(&packet[..layout.udp_offset + 6], &template.bytes()[..layout.udp_offset + 6]);
        }

        /// RFC 1624 update agrees with full recomputation
        #[test]
        fn incremental_update_matches_recompute(
            mut block in prop::collection::vec(any::<u8>(), 16..256),
            start_word in 1usize..8,
            replacement in prop::collection::vec(any::<u8>(), 2..=8),
        ) {
            let len = replacement.len() & !1;
            let start = start_word * 2;
            prop_assume!(start + len <= block.len());

            block[0] = 0;
            block[1] = 0;
            let check = internet_checksum(&block);
            block[0..2].copy_from_slice(&check.to_be_bytes());

            let old = block[start..start + len].to_vec();
            block[start..start + len].copy_from_slice(&replacement[..len]);
            // An all-zero block has no valid encoding other than 0xffff
            prop_assume!(block[2..].iter().any(|&b| b != 0));
            let updated = update_checksum(check, &old, &replacement[..len]);
            block[0..2].copy_from_slice(&updated.to_be_bytes());
            prop_assert!(verify_checksum(&block));
        }
    }
}

// ============================================================================
// Ring Properties
// ============================================================================

mod ring_properties {
    use super::*;
    use pulsetx_transport::ring::pair;

    #[derive(Debug, Clone)]
    enum Op {
        Produce(u32),
        Consume(u32),
    }

    fn arb_op() -> impl Strategy<Value = Op> {
        prop_oneof![(1u32..=12).prop_map(Op::Produce), (1u32..=12).prop_map(Op::Consume)]
    }

    proptest! {
        /// Entries in flight never exceed capacity, reserve succeeds exactly
        /// when there is room, and entries come out in order.
        #[test]
        fn capacity_invariant(
            size_log2 in 1u32..5,
            ops in prop::collection::vec(arb_op(), 1..200),
        ) {
            let size = 1u32 << size_log2;
            let (mut prod, mut cons) = pair::<u64>(size).unwrap();
            let mut next = 0u64;
            let mut expected = 0u64;
            let mut in_flight = 0u32;

            for op in ops {
                match op {
                    Op::Produce(n) => match prod.reserve(n) {
                        Some(idx) => {
                            prop_assert!(in_flight + n <= size);
                            for i in 0..n {
                                prod.write(idx.wrapping_add(i), next);
                                next += 1;
                            }
                            prod.submit(n);
                            in_flight += n;
                        }
                        None => prop_assert!(in_flight + n > size),
                    },
                    Op::Consume(max) => {
                        if let Some((idx, n)) = cons.peek(max) {
                            prop_assert!(n <= max && n <= in_flight);
                            for i in 0..n {
                                prop_assert_eq!(cons.read(idx.wrapping_add(i)), expected);
                                expected += 1;
                            }
                            cons.release(n);
                            in_flight -= n;
                        } else {
                            prop_assert_eq!(in_flight, 0);
                        }
                    }
                }
                prop_assert_eq!(prod.pending(), in_flight);
                prop_assert!(prod.pending() <= size);
            }
        }
    }
}

// ============================================================================
// Frame Table Properties
// ============================================================================

mod table_properties {
    use super::*;
    use pulsetx_core::CycleTable;
    use std::collections::HashSet;

    proptest! {
        /// Frames are disjoint across sockets and parities and stay inside
        /// the `sockets * 2B * fpp` frames the pool reserves.
        #[test]
        fn tables_partition_the_pool(
            sockets in 1u32..5,
            batch in 1u32..64,
            fpp in 1u32..4,
        ) {
            let mut seen = HashSet::new();
            for socket in 0..sockets {
                let table = CycleTable::new(socket, batch, fpp);
                for parity in 0..2 {
                    let frames = table.frames(parity);
                    prop_assert_eq!(frames.len() as u32, batch);
                    for &first in frames {
                        prop_assert_eq!(first % fpp, 0);
                        for frame in first..first + fpp {
                            prop_assert!(frame < sockets * 2 * batch * fpp);
                            prop_assert!(seen.insert(frame), "frame {} used twice", frame);
                        }
                    }
                }
            }
            prop_assert_eq!(seen.len() as u32, sockets * 2 * batch * fpp);
        }
    }
}
