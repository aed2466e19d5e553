//! Property-based tests using proptest
//!
//! Framing, addressing and bulk region invariants across randomly generated
//! inputs, plus end-to-end round trips through an in-process daemon.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::BytesMut;
use dim_transport::bulk::{AccessMode, BulkRegion};
use dim_transport::config::{MAGIC_BYTES, PROTOCOL_VERSION};
use dim_transport::core::codec::PacketCodec;
use dim_transport::core::packet::Packet;
use dim_transport::{DimClient, DimConfig, PeerDaemon, PeerUrl, Protocol};
use proptest::prelude::*;
use tokio_util::codec::Decoder;

fn protocol_strategy() -> impl Strategy<Value = Protocol> {
    prop_oneof![
        Just(Protocol::Tcp),
        Just(Protocol::Verbs),
        Just(Protocol::OfiTcp),
        Just(Protocol::OfiVerbs),
        Just(Protocol::OfiGni),
        Just(Protocol::UcxTcp),
        Just(Protocol::UcxVerbs),
        Just(Protocol::SmShm),
        Just(Protocol::BmiTcp),
    ]
}

// Property: any packet survives encoding, and the header describes it
proptest! {
    #[test]
    fn prop_packet_roundtrip(payload in prop::collection::vec(any::<u8>(), 0..10000)) {
        let bytes = Packet::new(payload.clone()).to_bytes();

        prop_assert_eq!(&bytes[..4], &MAGIC_BYTES[..]);
        prop_assert_eq!(bytes[4], PROTOCOL_VERSION);
        prop_assert_eq!(&bytes[5..9], &(payload.len() as u32).to_be_bytes()[..]);

        let decoded = Packet::from_bytes(&bytes).expect("Deserialization should not fail");
        prop_assert_eq!(decoded.payload, payload);
    }
}

// Property: the codec reassembles frames however the stream is split
proptest! {
    #[test]
    fn prop_codec_split_anywhere(
        frames in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 1..6),
        cut in 1usize..64,
    ) {
        let wire: Vec<u8> = frames
            .iter()
            .flat_map(|f| Packet::new(f.clone()).to_bytes())
            .collect();

        let mut codec = PacketCodec;
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for chunk in wire.chunks(cut) {
            buf.extend_from_slice(chunk);
            while let Some(packet) = codec.decode(&mut buf).unwrap() {
                decoded.push(packet.payload);
            }
        }

        prop_assert_eq!(decoded, frames);
        prop_assert!(buf.is_empty());
    }
}

// Property: a header with the wrong magic is always rejected
proptest! {
    #[test]
    fn prop_packet_rejects_invalid_magic(
        magic in prop::array::uniform4(any::<u8>()),
        payload in prop::collection::vec(any::<u8>(), 0..100),
    ) {
        prop_assume!(magic != MAGIC_BYTES);
        let mut bytes = Packet::new(payload).to_bytes();
        bytes[..4].copy_from_slice(&magic);
        prop_assert!(Packet::from_bytes(&bytes).is_err());
    }
}

// Property: peer URLs print and parse back to the same peer
proptest! {
    #[test]
    fn prop_peer_url_text_form(
        protocol in protocol_strategy(),
        octets in prop::array::uniform4(any::<u8>()),
        port in any::<u16>(),
    ) {
        let host = std::net::Ipv4Addr::from(octets).to_string();
        let url = PeerUrl::new(protocol, host.clone(), port);
        let text = url.to_string();

        prop_assert_eq!(text.clone(), format!("{}://{}:{}", protocol.as_str(), host, port));
        prop_assert_eq!(text.parse::<PeerUrl>().unwrap(), url);
    }
}

// Property: a write is visible to a later read of the same range, and
// nothing outside it changes
proptest! {
    #[test]
    fn prop_region_write_then_read(
        size in 1usize..512,
        offset in 0usize..512,
        data in prop::collection::vec(any::<u8>(), 0..128),
    ) {
        let mut region = BulkRegion::new(1, vec![0; size], AccessMode::ReadWrite);
        let fits = offset + data.len() <= size;

        let result = region.write(offset as u64, &data);
        prop_assert_eq!(result.is_ok(), fits);

        if fits {
            prop_assert_eq!(region.read(offset as u64, data.len() as u64).unwrap(), &data[..]);
            let bytes = region.into_inner();
            prop_assert!(bytes[..offset].iter().all(|b| *b == 0));
            prop_assert!(bytes[offset + data.len()..].iter().all(|b| *b == 0));
        } else {
            prop_assert!(region.into_inner().iter().all(|b| *b == 0));
        }
    }
}

// Property: get_bytes(set_bytes(create_key(p), p)) == p through a live daemon,
// with bulk chunks smaller than most payloads
proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_store_round_trip(payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..4096), 1..8)) {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let fetched = runtime.block_on(async {
            let mut config = DimConfig::default();
            config.transport.bulk_chunk_size = 1000;
            config.logging.log_to_console = false;

            let url = PeerUrl::new(Protocol::Tcp, "127.0.0.1", 0);
            let daemon = PeerDaemon::bind(&url, &config).await.unwrap().spawn();
            config.client.port = daemon.url().port;

            let client = DimClient::connect(config).await.unwrap();
            let keys = client.put_batch(&payloads).await.unwrap();
            let fetched = client.get_batch(&keys).await.unwrap();

            client.close().await.unwrap();
            daemon.shutdown().await.unwrap();
            fetched
        });

        let expected: Vec<Option<Vec<u8>>> = payloads.into_iter().map(Some).collect();
        prop_assert_eq!(fetched, expected);
    }
}
