//! Piano-roll geometry: one quad per visible note, regenerated every frame.
//!
//! Two draw channels share the note timeline. `NoteBars` renders the
//! scrolling note rectangles; `KeyBed` renders the key strip with live
//! pressed-state highlighting. Both write a fixed-capacity interleaved
//! buffer; overflowing it is an error surfaced to the caller, never a silent
//! truncation, because dropping notes would corrupt the visual ordering.

use super::{FrameGeometry, GeometryConstructor, GeometryError, Topology, VertexLayout};
use crate::score::{is_white_key, NoteEvent, NoteTimeline, PlaybackClock};
use crate::shader::io::{Direction, GlslType, IoVariable, Stage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default vertex-stage body matching the `NoteBars` IO contract.
pub const NOTE_BARS_VERTEX_BODY: &str = "\
void main() {
    v_local = local;
    v_size = size;
    v_pitch = pitch;
    v_velocity = velocity;
    v_channel = channel;
    v_playing = playing;
    v_white = white;
    gl_Position = vec4(position, 0.0, 1.0);
}
";

/// Default vertex-stage body matching the `KeyBed` IO contract.
pub const KEY_BED_VERTEX_BODY: &str = "\
void main() {
    v_local = local;
    v_pitch = pitch;
    v_playing = playing;
    v_white = white;
    gl_Position = vec4(position, 0.0, 1.0);
}
";

/// Which geometry a roll constructor emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollChannel {
    /// Scrolling note rectangles.
    NoteBars,
    /// The key strip along the bottom of the frame.
    KeyBed,
}

/// Piano-roll construction options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollOptions {
    pub channel: RollChannel,
    /// Largest simultaneous visible note count the buffer is sized for.
    pub max_notes: usize,
    /// Inclusive MIDI pitch range mapped across the frame width.
    pub pitch_range: (u8, u8),
    /// Seconds of timeline visible above the now line.
    pub look_ahead: f64,
    /// Seconds a finished note stays visible below the now line.
    pub tail: f64,
    /// Horizontal gap between key lanes, as a fraction of lane width.
    pub lane_gap: f32,
    /// Key-bed strip height as a fraction of frame height.
    pub key_bed_height: f32,
}

impl Default for RollOptions {
    fn default() -> Self {
        Self {
            channel: RollChannel::NoteBars,
            max_notes: 96,
            // 88-key piano range.
            pitch_range: (21, 108),
            look_ahead: 3.0,
            tail: 0.25,
            lane_gap: 0.1,
            key_bed_height: 0.12,
        }
    }
}

impl RollOptions {
    fn key_count(&self) -> usize {
        (self.pitch_range.1 - self.pitch_range.0) as usize + 1
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct BarVertex {
    position: [f32; 2],
    local: [f32; 2],
    size: [f32; 2],
    pitch: f32,
    velocity: f32,
    channel: i32,
    playing: f32,
    white: f32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
struct KeyVertex {
    position: [f32; 2],
    local: [f32; 2],
    size: [f32; 2],
    pitch: f32,
    playing: f32,
    white: f32,
}

/// Corner offsets in quad-local space, in quad-list vertex order.
const CORNERS: [[f32; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [-1.0, 1.0], [1.0, 1.0]];

/// Fixed-capacity per-frame quad generator over a note timeline.
pub struct PianoRollConstructor {
    timeline: Arc<NoteTimeline>,
    options: RollOptions,
    layout: VertexLayout,
    staging: Vec<u8>,
    live_notes: usize,
    /// Pressed state per key from the last successful key-bed frame, used to
    /// skip redundant uploads when nothing changed.
    last_pressed: Option<Vec<bool>>,
}

impl PianoRollConstructor {
    /// Create a constructor for one draw channel over `timeline`.
    ///
    /// Fails up front when the configured key range cannot fit the buffer
    /// (the key bed always draws the whole range).
    pub fn new(timeline: Arc<NoteTimeline>, options: RollOptions) -> Result<Self, GeometryError> {
        if options.pitch_range.1 < options.pitch_range.0 {
            return Err(GeometryError::InvalidLayout {
                spec: format!("{:?}", options.pitch_range),
                reason: "pitch range is inverted".to_string(),
            });
        }
        if options.channel == RollChannel::KeyBed && options.key_count() > options.max_notes {
            return Err(GeometryError::CapacityExceeded {
                requested: options.key_count(),
                capacity: options.max_notes,
            });
        }

        let layout = match options.channel {
            RollChannel::NoteBars => VertexLayout::from_spec(
                &["position", "local", "size", "pitch", "velocity", "channel", "playing", "white"],
                "2f 2f 2f 1f 1f 1i 1f 1f",
            ),
            RollChannel::KeyBed => VertexLayout::from_spec(
                &["position", "local", "size", "pitch", "playing", "white"],
                "2f 2f 2f 1f 1f 1f",
            ),
        }
        .expect("static layout specs are valid");

        let staging = Vec::with_capacity(options.max_notes * 4 * layout.stride() as usize);
        Ok(Self {
            timeline,
            options,
            layout,
            staging,
            live_notes: 0,
            last_pressed: None,
        })
    }

    /// Notes written by the last successful frame.
    pub fn live_note_count(&self) -> usize {
        self.live_notes
    }

    /// Vertices written by the last successful frame.
    pub fn vertex_count(&self) -> u32 {
        (self.live_notes * 4) as u32
    }

    pub fn options(&self) -> &RollOptions {
        &self.options
    }

    /// Horizontal lane span for a pitch, in NDC.
    fn lane_span(&self, pitch: u8) -> (f32, f32) {
        let (lo, _) = self.options.pitch_range;
        let lane_width = 2.0 / self.options.key_count() as f32;
        let gap = lane_width * self.options.lane_gap;
        let x0 = -1.0 + (pitch - lo) as f32 * lane_width;
        (x0 + gap * 0.5, x0 + lane_width - gap * 0.5)
    }

    /// Vertical NDC position of a timeline instant within the scroll window.
    fn scroll_y(&self, time: f64, now: f64) -> f32 {
        let window = self.options.tail + self.options.look_ahead;
        let t = (time - (now - self.options.tail)) / window;
        (-1.0 + 2.0 * t) as f32
    }

    fn in_range(&self, pitch: u8) -> bool {
        let (lo, hi) = self.options.pitch_range;
        (lo..=hi).contains(&pitch)
    }

    fn write_note_bars(&mut self, now: f64) -> Result<(), GeometryError> {
        let visible: Vec<NoteEvent> = self
            .timeline
            .visible(now, self.options.look_ahead, self.options.tail)
            .filter(|n| self.in_range(n.pitch))
            .cloned()
            .collect();

        if visible.len() > self.options.max_notes {
            return Err(GeometryError::CapacityExceeded {
                requested: visible.len(),
                capacity: self.options.max_notes,
            });
        }

        self.staging.clear();
        for note in &visible {
            let (x0, x1) = self.lane_span(note.pitch);
            let y0 = self.scroll_y(note.start_time, now);
            let y1 = self.scroll_y(note.end_time, now);
            let size = [x1 - x0, y1 - y0];
            let playing = if note.is_playing_at(now) { 1.0 } else { 0.0 };
            let white = if note.is_white_key { 1.0 } else { 0.0 };

            let xs = [x0, x1];
            for corner in CORNERS {
                let vertex = BarVertex {
                    position: [
                        xs[(corner[0] > 0.0) as usize],
                        if corner[1] > 0.0 { y1 } else { y0 },
                    ],
                    local: corner,
                    size,
                    pitch: note.pitch as f32,
                    velocity: note.velocity as f32 / 127.0,
                    channel: note.channel as i32,
                    playing,
                    white,
                };
                self.staging.extend_from_slice(bytemuck::bytes_of(&vertex));
            }
        }
        self.live_notes = visible.len();
        Ok(())
    }

    /// Whether the key-bed frame can reuse the previous upload.
    fn key_bed_unchanged(&mut self, pressed: &[bool]) -> bool {
        match &self.last_pressed {
            Some(last) if last.as_slice() == pressed => true,
            _ => {
                self.last_pressed = Some(pressed.to_vec());
                false
            }
        }
    }

    fn write_key_bed(&mut self, now: f64) {
        let (lo, hi) = self.options.pitch_range;
        let y0 = -1.0;
        let y1 = -1.0 + 2.0 * self.options.key_bed_height;

        self.staging.clear();
        for pitch in lo..=hi {
            let (x0, x1) = self.lane_span(pitch);
            let pressed = self.timeline.active_at(now).any(|n| n.pitch == pitch);
            let white = if is_white_key(pitch) { 1.0 } else { 0.0 };
            let size = [x1 - x0, y1 - y0];

            let xs = [x0, x1];
            let ys = [y0, y1];
            for corner in CORNERS {
                let vertex = KeyVertex {
                    position: [
                        xs[(corner[0] > 0.0) as usize],
                        ys[(corner[1] > 0.0) as usize],
                    ],
                    local: corner,
                    size,
                    pitch: pitch as f32,
                    playing: if pressed { 1.0 } else { 0.0 },
                    white,
                };
                self.staging.extend_from_slice(bytemuck::bytes_of(&vertex));
            }
        }
        self.live_notes = self.options.key_count();
    }
}

impl GeometryConstructor for PianoRollConstructor {
    fn io_contract(&self) -> Vec<IoVariable> {
        use Direction::{In, Out};
        use GlslType::{Float, Int, Vec2};
        use Stage::{Fragment, Vertex};

        match self.options.channel {
            RollChannel::NoteBars => vec![
                IoVariable::new(Vertex, In, Vec2, "position"),
                IoVariable::new(Vertex, In, Vec2, "local"),
                IoVariable::new(Vertex, In, Vec2, "size"),
                IoVariable::new(Vertex, In, Float, "pitch"),
                IoVariable::new(Vertex, In, Float, "velocity"),
                IoVariable::new(Vertex, In, Int, "channel"),
                IoVariable::new(Vertex, In, Float, "playing"),
                IoVariable::new(Vertex, In, Float, "white"),
                IoVariable::new(Vertex, Out, Vec2, "v_local"),
                IoVariable::new(Vertex, Out, Vec2, "v_size"),
                IoVariable::new(Vertex, Out, Float, "v_pitch"),
                IoVariable::new(Vertex, Out, Float, "v_velocity"),
                IoVariable::new(Vertex, Out, Int, "v_channel"),
                IoVariable::new(Vertex, Out, Float, "v_playing"),
                IoVariable::new(Vertex, Out, Float, "v_white"),
                IoVariable::new(Fragment, In, Vec2, "v_local"),
                IoVariable::new(Fragment, In, Vec2, "v_size"),
                IoVariable::new(Fragment, In, Float, "v_pitch"),
                IoVariable::new(Fragment, In, Float, "v_velocity"),
                IoVariable::new(Fragment, In, Int, "v_channel"),
                IoVariable::new(Fragment, In, Float, "v_playing"),
                IoVariable::new(Fragment, In, Float, "v_white"),
            ],
            RollChannel::KeyBed => vec![
                IoVariable::new(Vertex, In, Vec2, "position"),
                IoVariable::new(Vertex, In, Vec2, "local"),
                IoVariable::new(Vertex, In, Vec2, "size"),
                IoVariable::new(Vertex, In, Float, "pitch"),
                IoVariable::new(Vertex, In, Float, "playing"),
                IoVariable::new(Vertex, In, Float, "white"),
                IoVariable::new(Vertex, Out, Vec2, "v_local"),
                IoVariable::new(Vertex, Out, Float, "v_pitch"),
                IoVariable::new(Vertex, Out, Float, "v_playing"),
                IoVariable::new(Vertex, Out, Float, "v_white"),
                IoVariable::new(Fragment, In, Vec2, "v_local"),
                IoVariable::new(Fragment, In, Float, "v_pitch"),
                IoVariable::new(Fragment, In, Float, "v_playing"),
                IoVariable::new(Fragment, In, Float, "v_white"),
            ],
        }
    }

    fn vertex_layout(&self) -> &VertexLayout {
        &self.layout
    }

    fn topology(&self) -> Topology {
        Topology::QuadList
    }

    fn max_vertices(&self) -> u32 {
        (self.options.max_notes * 4) as u32
    }

    fn next_frame_buffer(
        &mut self,
        clock: &PlaybackClock,
    ) -> Result<FrameGeometry<'_>, GeometryError> {
        let now = clock.time();
        match self.options.channel {
            RollChannel::NoteBars => self.write_note_bars(now)?,
            RollChannel::KeyBed => {
                let (lo, hi) = self.options.pitch_range;
                let pressed: Vec<bool> = (lo..=hi)
                    .map(|pitch| self.timeline.active_at(now).any(|n| n.pitch == pitch))
                    .collect();
                if self.key_bed_unchanged(&pressed) {
                    return Ok(FrameGeometry::Unchanged {
                        vertex_count: self.vertex_count(),
                    });
                }
                self.write_key_bed(now);
            }
        }
        Ok(FrameGeometry::Updated {
            data: &self.staging,
            vertex_count: self.vertex_count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timeline(notes: &[(u8, f64, f64)]) -> Arc<NoteTimeline> {
        Arc::new(NoteTimeline::new(
            notes
                .iter()
                .map(|&(pitch, start, end)| NoteEvent::new(pitch, 100, 0, start, end))
                .collect(),
        ))
    }

    fn bars(timeline: Arc<NoteTimeline>, max_notes: usize) -> PianoRollConstructor {
        PianoRollConstructor::new(
            timeline,
            RollOptions {
                max_notes,
                ..RollOptions::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_chord_produces_one_quad_per_note_in_timeline_order() {
        let mut roll = bars(timeline(&[(60, 1.0, 2.0), (64, 1.0, 2.0), (67, 1.0, 2.0)]), 16);
        let mut clock = PlaybackClock::new(30);
        for _ in 0..45 {
            clock.advance(); // t = 1.5
        }

        let layout_stride = roll.vertex_layout().stride() as usize;
        match roll.next_frame_buffer(&clock).unwrap() {
            FrameGeometry::Updated { data, vertex_count } => {
                assert_eq!(vertex_count, 12);
                assert_eq!(data.len(), 12 * layout_stride);
                let vertices: Vec<BarVertex> = bytemuck::pod_collect_to_vec(data);
                let pitches: Vec<f32> = vertices.chunks(4).map(|q| q[0].pitch).collect();
                assert_eq!(pitches, [60.0, 64.0, 67.0]);
                assert!(vertices.iter().all(|v| v.playing == 1.0));
            }
            FrameGeometry::Unchanged { .. } => panic!("first frame must upload"),
        }
        assert_eq!(roll.live_note_count(), 3);
    }

    #[test]
    fn test_exact_capacity_succeeds() {
        let notes: Vec<(u8, f64, f64)> = (0..8).map(|i| (60 + i as u8, 0.0, 10.0)).collect();
        let mut roll = bars(timeline(&notes), 8);
        let clock = PlaybackClock::new(30);

        let frame = roll.next_frame_buffer(&clock).unwrap();
        assert_eq!(frame.vertex_count(), 32);
        assert_eq!(roll.live_note_count(), 8);
    }

    #[test]
    fn test_capacity_overflow_errors_and_preserves_prior_frame() {
        // Two notes now, a third joining later, capacity 2.
        let mut roll = bars(
            timeline(&[(60, 0.0, 10.0), (64, 0.0, 10.0), (67, 5.0, 10.0)]),
            2,
        );
        let mut clock = PlaybackClock::new(1);

        assert!(roll.next_frame_buffer(&clock).is_ok());
        assert_eq!(roll.live_note_count(), 2);

        for _ in 0..6 {
            clock.advance(); // t = 6.0, three notes visible
        }
        let err = roll.next_frame_buffer(&clock).unwrap_err();
        assert!(matches!(
            err,
            GeometryError::CapacityExceeded {
                requested: 3,
                capacity: 2,
            }
        ));
        // The prior successful frame's data is untouched.
        assert_eq!(roll.live_note_count(), 2);
        assert_eq!(
            roll.staging.len(),
            2 * 4 * roll.vertex_layout().stride() as usize
        );
    }

    #[test]
    fn test_notes_outside_pitch_range_are_not_drawn() {
        let mut roll = PianoRollConstructor::new(
            timeline(&[(10, 0.0, 5.0), (60, 0.0, 5.0)]),
            RollOptions {
                max_notes: 8,
                pitch_range: (21, 108),
                ..RollOptions::default()
            },
        )
        .unwrap();
        let clock = PlaybackClock::new(30);

        roll.next_frame_buffer(&clock).unwrap();
        assert_eq!(roll.live_note_count(), 1);
    }

    #[test]
    fn test_layout_cardinality_matches_written_bytes() {
        for channel in [RollChannel::NoteBars, RollChannel::KeyBed] {
            let mut roll = PianoRollConstructor::new(
                timeline(&[(60, 0.0, 5.0)]),
                RollOptions {
                    channel,
                    max_notes: 128,
                    ..RollOptions::default()
                },
            )
            .unwrap();
            let clock = PlaybackClock::new(30);
            let stride = roll.vertex_layout().stride() as usize;
            match roll.next_frame_buffer(&clock).unwrap() {
                FrameGeometry::Updated { data, vertex_count } => {
                    assert_eq!(data.len(), vertex_count as usize * stride, "{channel:?}");
                }
                FrameGeometry::Unchanged { .. } => panic!("first frame must upload"),
            }
        }
    }

    #[test]
    fn test_key_bed_draws_whole_range_and_tracks_pressed() {
        let mut roll = PianoRollConstructor::new(
            timeline(&[(60, 1.0, 2.0)]),
            RollOptions {
                channel: RollChannel::KeyBed,
                max_notes: 128,
                pitch_range: (60, 71),
                ..RollOptions::default()
            },
        )
        .unwrap();
        let clock = PlaybackClock::new(1);

        match roll.next_frame_buffer(&clock).unwrap() {
            FrameGeometry::Updated { data, vertex_count } => {
                assert_eq!(vertex_count, 12 * 4);
                let vertices: Vec<KeyVertex> = bytemuck::pod_collect_to_vec(data);
                // t = 0: nothing pressed; black keys classified.
                assert!(vertices.iter().all(|v| v.playing == 0.0));
                let blacks = vertices
                    .chunks(4)
                    .filter(|q| q[0].white == 0.0)
                    .count();
                assert_eq!(blacks, 5);
            }
            FrameGeometry::Unchanged { .. } => panic!("first frame must upload"),
        }

        let mut clock = clock;
        clock.advance(); // t = 1.0: middle C pressed
        match roll.next_frame_buffer(&clock).unwrap() {
            FrameGeometry::Updated { data, .. } => {
                let vertices: Vec<KeyVertex> = bytemuck::pod_collect_to_vec(data);
                let pressed: Vec<f32> = vertices.chunks(4).map(|q| q[0].playing).collect();
                assert_eq!(pressed.iter().filter(|&&p| p == 1.0).count(), 1);
                assert_eq!(pressed[0], 1.0); // pitch 60 is the first lane
            }
            FrameGeometry::Unchanged { .. } => panic!("pressed state changed"),
        }
    }

    #[test]
    fn test_key_bed_skips_upload_when_pressed_state_static() {
        let mut roll = PianoRollConstructor::new(
            timeline(&[(60, 10.0, 11.0)]),
            RollOptions {
                channel: RollChannel::KeyBed,
                max_notes: 128,
                pitch_range: (60, 71),
                ..RollOptions::default()
            },
        )
        .unwrap();
        let mut clock = PlaybackClock::new(30);

        assert!(matches!(
            roll.next_frame_buffer(&clock).unwrap(),
            FrameGeometry::Updated { .. }
        ));
        clock.advance();
        assert!(matches!(
            roll.next_frame_buffer(&clock).unwrap(),
            FrameGeometry::Unchanged { .. }
        ));
    }

    #[test]
    fn test_key_bed_range_must_fit_capacity() {
        let err = PianoRollConstructor::new(
            timeline(&[]),
            RollOptions {
                channel: RollChannel::KeyBed,
                max_notes: 10,
                pitch_range: (21, 108),
                ..RollOptions::default()
            },
        )
        .err()
        .unwrap();
        assert!(matches!(err, GeometryError::CapacityExceeded { .. }));
    }

    #[test]
    fn test_scroll_positions_move_with_time() {
        let mut roll = bars(timeline(&[(60, 2.0, 3.0)]), 8);
        let mut clock = PlaybackClock::new(1);

        let y_at = |roll: &mut PianoRollConstructor, clock: &PlaybackClock| -> f32 {
            match roll.next_frame_buffer(clock).unwrap() {
                FrameGeometry::Updated { data, .. } => {
                    let vertices: Vec<BarVertex> = bytemuck::pod_collect_to_vec(data);
                    vertices[0].position[1]
                }
                FrameGeometry::Unchanged { .. } => panic!("bars always rewrite"),
            }
        };

        let y0 = y_at(&mut roll, &clock); // t = 0, note ahead
        clock.advance();
        clock.advance(); // t = 2, note at the now line
        let y2 = y_at(&mut roll, &clock);
        assert!(y2 < y0, "note should fall toward the now line over time");
    }
}
