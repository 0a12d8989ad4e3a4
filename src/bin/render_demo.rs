//! Renders a synthetic note timeline to raw frames.
//!
//! Writes tightly packed RGB24 frames to the path given as the first
//! argument (pipe it into ffmpeg to encode), or discards them when no path
//! is given. Intended as a smoke test of the whole stack: timeline →
//! geometry → assembled GLSL → GPU → sink.
//!
//! ```sh
//! render_demo out.raw
//! ffmpeg -f rawvideo -pix_fmt rgb24 -s 640x360 -r 30 -i out.raw demo.mp4
//! ```

use anyhow::Context;
use midivis::{
    FrameScheduler, GpuContext, LayerDesc, NoteEvent, NoteTimeline, PianoRollConstructor,
    PixelFormat, RollChannel, RollOptions, SchedulerConfig, PipeSink, KEY_BED_VERTEX_BODY,
    NOTE_BARS_VERTEX_BODY,
};
use std::io::Write;
use std::sync::Arc;

const NOTE_BARS_FRAGMENT: &str = "\
void main() {
    vec2 edge = abs(v_local);
    float border = smoothstep(0.8, 1.0, max(edge.x, edge.y));
    vec3 base = v_white > 0.5 ? vec3(0.2, 0.85, 0.6) : vec3(0.9, 0.45, 0.2);
    base *= 0.35 + 0.65 * v_velocity;
    if (v_playing > 0.5) {
        base += vec3(0.25);
    }
    fragColor = vec4(mix(base, vec3(0.02), border), 1.0);
}
";

const KEY_BED_FRAGMENT: &str = "\
void main() {
    vec3 key = v_white > 0.5 ? vec3(0.85) : vec3(0.12);
    if (v_playing > 0.5) {
        key = mix(key, vec3(1.0, 0.8, 0.2), 0.7);
    }
    float seam = smoothstep(0.9, 1.0, abs(v_local.x));
    fragColor = vec4(mix(key, vec3(0.0), seam), 1.0);
}
";

/// A two-octave arpeggio with a held bass note.
fn synthetic_timeline() -> NoteTimeline {
    let mut notes = vec![NoteEvent::new(36, 110, 1, 0.0, 6.0)];
    let scale = [60u8, 62, 64, 65, 67, 69, 71, 72, 74, 76, 77, 79];
    for (i, &pitch) in scale.iter().enumerate() {
        let start = i as f64 * 0.4;
        notes.push(NoteEvent::new(pitch, 70 + (i as u8 * 4), 0, start, start + 0.6));
    }
    NoteTimeline::new(notes)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = SchedulerConfig {
        width: 640,
        height: 360,
        fps: 30,
        pixel_format: PixelFormat::Rgb24,
        background: [0.02, 0.02, 0.05],
        pace: false,
        ..SchedulerConfig::default()
    };

    let writer: Box<dyn Write + Send> = match std::env::args().nth(1) {
        Some(path) => Box::new(std::fs::File::create(&path).context("creating output file")?),
        None => Box::new(std::io::sink()),
    };
    let sink = PipeSink::new(writer, config.width, config.height, config.pixel_format);

    let ctx = GpuContext::new_blocking().context("acquiring GPU")?;
    let timeline = Arc::new(synthetic_timeline());
    let total_frames = (timeline.duration() * config.fps as f64).ceil() as u64;

    let mut scheduler = FrameScheduler::new(ctx, config, sink);

    let bars = PianoRollConstructor::new(
        timeline.clone(),
        RollOptions {
            pitch_range: (36, 84),
            ..RollOptions::default()
        },
    )?;
    scheduler
        .add_layer(LayerDesc {
            name: "note_bars".to_string(),
            fragment_source: NOTE_BARS_FRAGMENT.to_string(),
            vertex_body: NOTE_BARS_VERTEX_BODY.to_string(),
            resource_root: std::env::current_dir()?,
            constructor: Box::new(bars),
        })
        .context("building note_bars layer")?;

    let key_bed = PianoRollConstructor::new(
        timeline,
        RollOptions {
            channel: RollChannel::KeyBed,
            max_notes: 64,
            pitch_range: (36, 84),
            ..RollOptions::default()
        },
    )?;
    scheduler
        .add_layer(LayerDesc {
            name: "key_bed".to_string(),
            fragment_source: KEY_BED_FRAGMENT.to_string(),
            vertex_body: KEY_BED_VERTEX_BODY.to_string(),
            resource_root: std::env::current_dir()?,
            constructor: Box::new(key_bed),
        })
        .context("building key_bed layer")?;

    let summary = scheduler.run(total_frames)?;
    log::info!(
        "rendered {} frames, {} deadline misses",
        summary.frames,
        summary.deadline_misses
    );
    if !summary.faulted_layers.is_empty() {
        anyhow::bail!("layers faulted during the run: {:?}", summary.faulted_layers);
    }
    Ok(())
}
