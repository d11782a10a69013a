//! End-to-end paths: stream over loopback, reassemble, fuse

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use voxlink::core::{logging, FusionMode, StreamConfig, VoxlinkConfig};
use voxlink::fusion::FusionPipeline;
use voxlink::math::GridVec;
use voxlink::net::{Faults, LoopbackTransport, MessageAssembler, MessageFragment, VoxelStream, HEADER_SIZE};
use voxlink::serial::{SerialBuffer, SliceReader};
use voxlink::sync::RingBuffer;
use voxlink::voxel::{Octree, VoxelEncoding, VoxelMessage};

const WAIT: Duration = Duration::from_secs(5);

fn stream_config() -> StreamConfig {
    StreamConfig {
        send_interval_us: 0,
        ..StreamConfig::default()
    }
}

fn inbox(capacity: usize) -> Arc<RingBuffer<SerialBuffer>> {
    Arc::new(RingBuffer::from_fn(capacity, |_| SerialBuffer::message()))
}

/// Sender and receiver streams over a fresh loopback pair
fn link(datagram: usize) -> (VoxelStream, VoxelStream, Arc<RingBuffer<SerialBuffer>>) {
    let (a, b) = LoopbackTransport::pair(datagram).unwrap();
    let received = inbox(8);
    let tx = VoxelStream::new(a, &stream_config(), inbox(3)).unwrap();
    let rx = VoxelStream::new(b, &stream_config(), received.clone()).unwrap();
    (tx, rx, received)
}

fn capture(points: impl IntoIterator<Item = GridVec>) -> VoxelMessage {
    let mut msg = VoxelMessage::with_octree(Octree::new(7, 4));
    msg.set_encoding(VoxelEncoding::new(false, true, 0));
    for p in points {
        let v = msg.octree.ensure_voxel(p);
        msg.encoding.encode_rgb(&mut v.data, [p.x as u8, p.y as u8, p.z as u8]);
    }
    msg
}

fn sorted_cells(msg: &VoxelMessage) -> Vec<(GridVec, Vec<u8>)> {
    let mut out: Vec<_> = msg
        .octree
        .voxels()
        .map(|v| (v.position(), v.payload().to_vec()))
        .collect();
    out.sort();
    out
}

#[test]
fn fragment_boundaries_survive_the_link() {
    logging::init_for_tests();
    let datagram = 64;
    let max = datagram - HEADER_SIZE;
    let (tx, _rx, received) = link(datagram);

    for size in [0, 1, max - 1, max, max * 10 + 7] {
        let message: Vec<u8> = (0..size).map(|i| (i * 31 % 251) as u8).collect();
        assert!(tx.send_bytes(&message), "size {}", size);
        let got = received.advance_tail_timeout(WAIT).unwrap();
        assert_eq!(got.as_slice(), message.as_slice(), "size {}", size);
    }
    assert_eq!(tx.fragmenter_stats().messages_dropped, 0);
}

#[test]
fn reordered_fragments_discard_only_their_message() {
    let out = inbox(4);
    let asm = MessageAssembler::new("reorder", 16, out.clone()).unwrap();
    let datagram = |id: u64, number: u16, count: u16, body: &[u8]| {
        let mut f = MessageFragment::default();
        f.message_id = id;
        f.frag_number = number;
        f.frag_count = count;
        assert!(f.pack_payload(&mut SliceReader::new(body), body.len()));
        f.datagram().to_vec()
    };

    for (number, body) in [(0, b"a"), (2, b"c"), (1, b"b")] {
        asm.receive(&datagram(1, number, 3, body));
    }
    asm.receive(&datagram(2, 0, 2, b"he"));
    asm.receive(&datagram(2, 1, 2, b"llo"));

    let msg = out.advance_tail_timeout(WAIT).unwrap();
    assert_eq!(msg.as_slice(), b"hello");
    drop(msg);
    assert!(out.is_empty());
    assert_eq!(asm.stats().completed, 1);
    assert_eq!(asm.stats().desyncs, 1);
}

#[test]
fn lost_datagrams_cost_only_damaged_messages() {
    let (a, b) = LoopbackTransport::pair(40).unwrap();
    let received = inbox(8);
    let tx = VoxelStream::new(a.clone(), &stream_config(), inbox(3)).unwrap();
    let _rx = VoxelStream::new(b, &stream_config(), received.clone()).unwrap();

    // one-fragment messages; every third datagram is dropped
    a.set_faults(Faults {
        drop_every: 3,
        swap_pairs: false,
    });
    for i in 0..6u8 {
        assert!(tx.send_bytes(&[i; 10]));
    }
    let mut got = Vec::new();
    while let Some(msg) = received.advance_tail_timeout(Duration::from_millis(500)) {
        got.push(msg.as_slice()[0]);
    }
    assert_eq!(got, vec![0, 1, 3, 4]);
}

#[test]
fn two_sources_make_one_frame() {
    logging::init_for_tests();
    let mut config = VoxlinkConfig::default();
    config.stream = stream_config();
    config.fusion.min_frame_sources = 2;
    let mut pipeline = FusionPipeline::from_config(&config);

    let mut links = Vec::new();
    for (id, x) in [("left", -20), ("right", 20)] {
        let (a, b) = LoopbackTransport::pair(256).unwrap();
        let fused_in = pipeline.add_source(id).unwrap();
        let tx = VoxelStream::new(a, &config.stream, inbox(3)).unwrap();
        let rx = VoxelStream::new(b, &config.stream, fused_in).unwrap();
        let msg = capture((0..10).map(|i| GridVec::new(x, i, 0)));
        assert!(tx.send_message(&msg));
        links.push((tx, rx));
    }

    let out = pipeline.output();
    let frame = out.advance_tail_timeout(WAIT).unwrap();
    assert_eq!(frame.octree.vox_count(), 20);
    let v = frame.octree.try_get_voxel(GridVec::new(20, 3, 0)).unwrap();
    assert_eq!(frame.encoding.source(&v.data), Some(1));
    assert_eq!(frame.encoding.decode_rgb(&v.data), [20, 3, 0]);
    assert_eq!(pipeline.fusion().sequential_fail_count(), 0);
}

#[test]
fn tsdf_fusion_is_repeatable() {
    let mut config = VoxlinkConfig::default();
    config.fusion.mode = FusionMode::Tsdf;
    let mut pipeline = FusionPipeline::from_config(&config);
    let a = pipeline.add_source("a").unwrap();
    let b = pipeline.add_source("b").unwrap();

    let wall = |x: i64| capture((0..6).flat_map(move |y| (0..6).map(move |z| GridVec::new(x, y, z))));
    let (wall_a, wall_b) = (wall(0), wall(1));
    let out = pipeline.output();

    let mut frames = Vec::new();
    for _ in 0..2 {
        for (ring, msg) in [(&a, &wall_a), (&b, &wall_b)] {
            assert!(voxlink::serial::SerialMessage::pack_message(msg, &mut ring.current_head()));
            assert!(ring.advance_head());
        }
        let frame = out.advance_tail_timeout(WAIT).unwrap();
        frames.push(sorted_cells(&frame));
    }
    assert!(!frames[0].is_empty());
    assert_eq!(frames[0], frames[1]);
}

#[test]
fn tsdf_single_source_fed_twice_is_stable() {
    let mut config = VoxlinkConfig::default();
    config.fusion.mode = FusionMode::Tsdf;
    let mut pipeline = FusionPipeline::from_config(&config);
    let only = pipeline.add_source("only").unwrap();

    let msg = capture((0..6).flat_map(|y| (0..6).map(move |z| GridVec::new(2, y, z))));
    let out = pipeline.output();

    let mut frames = Vec::new();
    for _ in 0..2 {
        assert!(voxlink::serial::SerialMessage::pack_message(&msg, &mut only.current_head()));
        assert!(only.advance_head());
        let frame = out.advance_tail_timeout(WAIT).unwrap();
        frames.push(sorted_cells(&frame));
    }
    assert_eq!(frames[0].len(), 36);
    assert_eq!(frames[0], frames[1]);
    assert_eq!(frames[0], sorted_cells(&msg));
}

#[test]
fn release_unblocks_producer_and_consumer() {
    let ring: Arc<RingBuffer<u32>> = Arc::new(RingBuffer::new(3));
    assert!(ring.advance_head());
    assert!(ring.is_full());

    let producer = {
        let ring = ring.clone();
        thread::spawn(move || ring.advance_head())
    };
    let empty: Arc<RingBuffer<u32>> = Arc::new(RingBuffer::new(3));
    let consumer = {
        let empty = empty.clone();
        thread::spawn(move || empty.advance_tail().is_none())
    };

    thread::sleep(Duration::from_millis(20));
    ring.release();
    empty.release();
    assert!(!producer.join().unwrap());
    assert!(consumer.join().unwrap());
}
