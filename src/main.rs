//! Voxlink - loopback merge node
//!
//! Streams synthetic captures from several sources over in-process
//! transports into a fusion pipeline and reports the fused frames.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use voxlink::core::{logging, VoxlinkConfig};
use voxlink::fusion::FusionPipeline;
use voxlink::math::GridVec;
use voxlink::net::{LoopbackTransport, VoxelStream};
use voxlink::serial::SerialBuffer;
use voxlink::sync::RingBuffer;
use voxlink::voxel::{Octree, Pose, PoseType, VoxelEncoding, VoxelMessage};

/// Datagram size of the in-process links
const LINK_DATAGRAM: usize = 1400;

fn main() {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    let config = match parse_path_arg(&args, "--config") {
        Some(path) => match VoxlinkConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Failed to load {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => VoxlinkConfig::default(),
    };
    let sources = parse_count_arg(&args, "--sources").unwrap_or(3);
    let frames = parse_count_arg(&args, "--frames").unwrap_or(30);

    if let Err(e) = run(&config, sources, frames) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(config: &VoxlinkConfig, sources: usize, frames: usize) -> voxlink::Result<()> {
    log::info!(
        "Merging {} sources for {} frames ({:?} fusion)",
        sources,
        frames,
        config.fusion.mode
    );

    let mut pipeline = FusionPipeline::from_config(config);
    let mut senders = Vec::new();
    let mut receivers = Vec::new();
    for i in 0..sources {
        let (capture, merge) = LoopbackTransport::pair(LINK_DATAGRAM)?;
        let inbox = pipeline.add_source(&format!("cam{}", i))?;
        let unused = Arc::new(RingBuffer::from_fn(3, |_| SerialBuffer::short()));
        senders.push(VoxelStream::new(capture, &config.stream, unused)?);
        receivers.push(VoxelStream::new(merge, &config.stream, inbox)?);
    }

    let output = pipeline.output();
    let started = Instant::now();
    let mut fused = 0;
    for frame in 0..frames {
        for (i, stream) in senders.iter().enumerate() {
            let msg = capture(config, i, frame as i64);
            if !stream.send_message(&msg) {
                log::warn!("cam{}: frame {} not queued", i, frame);
            }
        }
        if let Some(out) = output.advance_tail_timeout(Duration::from_secs(2)) {
            fused += 1;
            log::info!(
                "Fused frame {}: {} voxels from {} poses",
                out.frame_number,
                out.octree.vox_count(),
                out.poses.len()
            );
        } else {
            log::warn!("No fused frame within 2s");
        }
    }

    let elapsed = started.elapsed().as_secs_f64();
    log::info!(
        "{} of {} frames fused in {:.2}s ({:.1} Hz)",
        fused,
        frames,
        elapsed,
        fused as f64 / elapsed.max(f64::EPSILON)
    );
    for stream in &receivers {
        log::info!("{}: {:?}", stream.peer(), stream.assembler_stats());
    }
    pipeline.release();
    Ok(())
}

/// A ring of voxels around source `i`, drifting with the frame number
fn capture(config: &VoxlinkConfig, i: usize, frame: i64) -> VoxelMessage {
    let mut msg = VoxelMessage::with_octree(Octree::from_config(&config.octree));
    msg.set_encoding(VoxelEncoding::new(false, true, 0));
    msg.frame_number = frame;
    // cameras past the last RGBD tag get private ones
    let kind = u8::try_from(i)
        .ok()
        .and_then(PoseType::rgbd)
        .unwrap_or(PoseType::Other(100 + i as i64));
    msg.push_pose(Pose::new(
        voxlink::core::now_ms(),
        kind,
        glam::DVec3::new(i as f64, 0.0, 0.0),
        glam::DQuat::IDENTITY,
    ));

    let radius = msg.octree.grid_width() / 4;
    let centre = GridVec::new((i as i64 * 3 + frame) % radius, 0, 0);
    for step in 0..360 {
        let angle = (step as f64).to_radians();
        let offset = GridVec::from_floor(glam::DVec3::new(angle.cos(), angle.sin(), 0.0) * radius as f64);
        let pos = centre + offset;
        if msg.octree.contains(pos) {
            let v = msg.octree.ensure_voxel(pos);
            msg.encoding.encode_rgb(&mut v.data, [(i * 60) as u8, step as u8, 200]);
            msg.encoding.set_source(&mut v.data, i as u8);
        }
    }
    msg
}

fn parse_path_arg(args: &[String], flag: &str) -> Option<PathBuf> {
    let i = args.iter().position(|a| a == flag)?;
    args.get(i + 1).map(PathBuf::from)
}

fn parse_count_arg(args: &[String], flag: &str) -> Option<usize> {
    let i = args.iter().position(|a| a == flag)?;
    args.get(i + 1).and_then(|s| s.parse().ok())
}
