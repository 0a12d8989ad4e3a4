//! Note timeline supplied by the MIDI collaborator.
//!
//! MIDI parsing itself lives outside this crate; what arrives here is an
//! ordered sequence of note events with absolute start/end times. The
//! timeline answers the two queries the geometry constructors need every
//! frame: which notes are visible in the scroll window, and which are
//! sounding right now. Events cross the process boundary as JSON.

use serde::{Deserialize, Serialize};

/// Frame-quantized playback position driven by the scheduler.
///
/// Time only ever advances in whole frame steps, so a frame index plus the
/// frame rate is the entire state; times derived from it are exact for any
/// frame the run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackClock {
    frame_index: u64,
    fps: u32,
}

impl PlaybackClock {
    pub fn new(fps: u32) -> Self {
        Self {
            frame_index: 0,
            fps: fps.max(1),
        }
    }

    /// Advance by one frame duration.
    pub fn advance(&mut self) {
        self.frame_index += 1;
    }

    pub fn reset(&mut self) {
        self.frame_index = 0;
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Playback time in seconds.
    pub fn time(&self) -> f64 {
        self.frame_index as f64 / self.fps as f64
    }

    pub fn frame_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(1.0 / self.fps as f64)
    }
}

/// One note from the performance timeline. Read-only to this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// MIDI pitch, 0-127.
    pub pitch: u8,
    /// MIDI velocity, 0-127.
    pub velocity: u8,
    pub channel: u8,
    /// Absolute start time in seconds.
    pub start_time: f64,
    /// Absolute end time in seconds.
    pub end_time: f64,
    /// Whether the pitch falls on a white key.
    #[serde(default = "default_white_key")]
    pub is_white_key: bool,
}

fn default_white_key() -> bool {
    true
}

impl NoteEvent {
    /// Build an event from raw MIDI fields, computing the white-key flag.
    pub fn new(pitch: u8, velocity: u8, channel: u8, start_time: f64, end_time: f64) -> Self {
        Self {
            pitch: pitch.min(127),
            velocity: velocity.min(127),
            channel,
            start_time,
            end_time: end_time.max(start_time),
            is_white_key: is_white_key(pitch),
        }
    }

    /// Whether the note is sounding at `time`.
    pub fn is_playing_at(&self, time: f64) -> bool {
        self.start_time <= time && time <= self.end_time
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Whether a MIDI pitch lands on a white key.
pub fn is_white_key(pitch: u8) -> bool {
    // Pitch classes C C# D D# E F F# G G# A A# B.
    !matches!(pitch % 12, 1 | 3 | 6 | 8 | 10)
}

/// Start-time-ordered note sequence for one performance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoteTimeline {
    notes: Vec<NoteEvent>,
}

impl NoteTimeline {
    /// Build a timeline, sorting by start time and normalizing inverted
    /// note spans.
    pub fn new(mut notes: Vec<NoteEvent>) -> Self {
        for note in &mut notes {
            if note.end_time < note.start_time {
                note.end_time = note.start_time;
            }
        }
        notes.sort_by(|a, b| {
            a.start_time
                .partial_cmp(&b.start_time)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Self { notes }
    }

    /// Deserialize a timeline from the JSON interchange format: an array of
    /// note event objects.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let notes: Vec<NoteEvent> = serde_json::from_str(json)?;
        Ok(Self::new(notes))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.notes)
    }

    pub fn notes(&self) -> &[NoteEvent] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// End time of the last note, i.e. the performance length in seconds.
    pub fn duration(&self) -> f64 {
        self.notes
            .iter()
            .map(|n| n.end_time)
            .fold(0.0, f64::max)
    }

    /// Notes overlapping the window `[now - tail, now + look_ahead)`, in
    /// timeline order. This is the scroll window a piano roll renders.
    pub fn visible<'a>(
        &'a self,
        now: f64,
        look_ahead: f64,
        tail: f64,
    ) -> impl Iterator<Item = &'a NoteEvent> {
        let window_start = now - tail;
        let window_end = now + look_ahead;
        self.notes
            .iter()
            .filter(move |n| n.end_time > window_start && n.start_time < window_end)
    }

    /// Notes sounding at `now`, in timeline order.
    pub fn active_at<'a>(&'a self, now: f64) -> impl Iterator<Item = &'a NoteEvent> {
        self.notes.iter().filter(move |n| n.is_playing_at(now))
    }
}
