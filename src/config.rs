// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! YAML configuration for the engine and for pattern files.

use std::fs;
use std::path::Path;

use config::{Config, File};
use serde::Deserialize;
use thiserror::Error;

use crate::looper::{LoopEngine, DEFAULT_FADE_IN, DEFAULT_FADE_OUT};
use crate::sequence::{
    ChannelSound, LoopWindow, NoteEvent, Pattern, QuantizeGrid, SequenceError, Track,
    DEFAULT_MAX_LOOP_DURATION,
};
use crate::voices::governor::{
    GlobalVoiceGovernor, DEFAULT_LEVEL_CEILING, DEFAULT_MAX_POLYPHONY, DEFAULT_OVERLOAD_COOLDOWN,
};
use crate::voices::pool::DEFAULT_MAX_OVERLAP_VOICES;

/// An error with the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config load/parse error: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Config read error: {0}")]
    Read(#[from] std::io::Error),
    #[error("Pattern parse error: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("Invalid note in pattern: {0}")]
    Note(#[from] SequenceError),
}

/// The engine configuration file.
#[derive(Debug, Default, Deserialize)]
pub struct EngineConfig {
    /// Loop window and playback shaping settings.
    #[serde(rename = "loop", default)]
    loop_settings: LoopSettings,
    /// Voice pool and governor settings.
    #[serde(default)]
    voices: VoiceSettings,
    /// Transport settings.
    #[serde(default)]
    transport: TransportSettings,
}

impl EngineConfig {
    /// Loads the engine configuration from a YAML file.
    pub fn load(path: &Path) -> Result<EngineConfig, ConfigError> {
        Ok(Config::builder()
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?)
    }

    /// The loop settings.
    pub fn loop_settings(&self) -> &LoopSettings {
        &self.loop_settings
    }

    /// The voice settings.
    pub fn voices(&self) -> &VoiceSettings {
        &self.voices
    }

    /// The transport settings.
    pub fn transport(&self) -> &TransportSettings {
        &self.transport
    }
}

/// The loop window and playback shaping settings.
#[derive(Debug, Deserialize)]
pub struct LoopSettings {
    /// Loop start within the source sequence, in seconds.
    #[serde(default)]
    start: f64,
    /// Loop end within the source sequence, in seconds.
    #[serde(default = "default_loop_end")]
    end: f64,
    /// Safety cap on the loop duration, in seconds.
    #[serde(default = "default_max_loop_duration")]
    max_loop_duration: f64,
    /// The number of loops to play. Omit for infinite looping.
    #[serde(default)]
    max_loops: Option<u32>,
    /// The quantization grid name. Omit to disable quantization.
    #[serde(default)]
    quantize: Option<QuantizeGrid>,
    /// Swing amount in `[0, 1]`.
    #[serde(default)]
    swing: f64,
    /// Crossfade duration in seconds. Zero disables crossfading.
    #[serde(default)]
    crossfade: f64,
    /// Fade-in applied when looping starts, in seconds.
    #[serde(default = "default_fade_in")]
    fade_in: f64,
    /// Fade-out applied when looping stops, in seconds.
    #[serde(default = "default_fade_out")]
    fade_out: f64,
    /// The tempo the source sequence was captured at, in BPM.
    #[serde(default = "default_tempo")]
    original_tempo: f64,
    /// The tempo to play back at, in BPM. Omit to keep the original tempo.
    #[serde(default)]
    target_tempo: Option<f64>,
}

fn default_loop_end() -> f64 {
    4.0
}

fn default_max_loop_duration() -> f64 {
    DEFAULT_MAX_LOOP_DURATION
}

fn default_fade_in() -> f64 {
    DEFAULT_FADE_IN
}

fn default_fade_out() -> f64 {
    DEFAULT_FADE_OUT
}

fn default_tempo() -> f64 {
    120.0
}

impl Default for LoopSettings {
    fn default() -> LoopSettings {
        LoopSettings {
            start: 0.0,
            end: default_loop_end(),
            max_loop_duration: default_max_loop_duration(),
            max_loops: None,
            quantize: None,
            swing: 0.0,
            crossfade: 0.0,
            fade_in: default_fade_in(),
            fade_out: default_fade_out(),
            original_tempo: default_tempo(),
            target_tempo: None,
        }
    }
}

impl LoopSettings {
    /// Builds a loop engine from these settings.
    pub fn to_engine(&self) -> LoopEngine {
        let window = LoopWindow::new(self.start, self.end, self.max_loop_duration);
        let mut engine = LoopEngine::new(window, self.original_tempo);
        engine.set_fades(self.fade_in, self.fade_out);
        engine.set_quantization(self.quantize);
        engine.set_swing(self.swing);
        engine.set_crossfade(self.crossfade);
        engine.set_max_loops(self.max_loops);
        if let Some(target_tempo) = self.target_tempo {
            engine.set_tempo_conversion(self.original_tempo, target_tempo);
        }
        engine
    }
}

/// Voice pool and governor settings.
#[derive(Debug, Deserialize)]
pub struct VoiceSettings {
    /// The voice cap per overlapping channel.
    #[serde(default = "default_max_overlap_voices")]
    max_overlap_voices: usize,
    /// The engine-wide voice cap.
    #[serde(default = "default_max_polyphony")]
    max_polyphony: usize,
    /// The output level above which samples count toward overload.
    #[serde(default = "default_level_ceiling")]
    level_ceiling: f64,
    /// How long the reduced master gain is held after an overload, in seconds.
    #[serde(default = "default_overload_cooldown")]
    overload_cooldown: f64,
}

fn default_max_overlap_voices() -> usize {
    DEFAULT_MAX_OVERLAP_VOICES
}

fn default_max_polyphony() -> usize {
    DEFAULT_MAX_POLYPHONY
}

fn default_level_ceiling() -> f64 {
    DEFAULT_LEVEL_CEILING
}

fn default_overload_cooldown() -> f64 {
    DEFAULT_OVERLOAD_COOLDOWN
}

impl Default for VoiceSettings {
    fn default() -> VoiceSettings {
        VoiceSettings {
            max_overlap_voices: default_max_overlap_voices(),
            max_polyphony: default_max_polyphony(),
            level_ceiling: default_level_ceiling(),
            overload_cooldown: default_overload_cooldown(),
        }
    }
}

impl VoiceSettings {
    /// The voice cap per overlapping channel.
    pub fn max_overlap_voices(&self) -> usize {
        self.max_overlap_voices
    }

    /// Builds a governor from these settings.
    pub fn to_governor(&self) -> GlobalVoiceGovernor {
        GlobalVoiceGovernor::new(self.max_polyphony, self.level_ceiling, self.overload_cooldown)
    }
}

/// Transport settings.
#[derive(Debug, Deserialize)]
pub struct TransportSettings {
    /// How many loop iterations are materialized ahead of the playhead.
    #[serde(default = "default_ahead_count")]
    ahead_count: u32,
}

fn default_ahead_count() -> u32 {
    crate::transport::DEFAULT_AHEAD_COUNT
}

impl Default for TransportSettings {
    fn default() -> TransportSettings {
        TransportSettings {
            ahead_count: default_ahead_count(),
        }
    }
}

impl TransportSettings {
    /// How many loop iterations are materialized ahead of the playhead.
    pub fn ahead_count(&self) -> u32 {
        self.ahead_count
    }
}

/// One note within a pattern file.
#[derive(Debug, Deserialize)]
struct NoteDefinition {
    note: String,
    start: f64,
    duration: f64,
    #[serde(default = "default_velocity")]
    velocity: f64,
}

fn default_velocity() -> f64 {
    0.8
}

/// One track within a pattern file.
#[derive(Debug, Deserialize)]
struct TrackDefinition {
    channel: String,
    #[serde(default)]
    sound: ChannelSound,
    #[serde(default)]
    notes: Vec<NoteDefinition>,
}

/// One YAML document in a pattern file.
#[derive(Debug, Deserialize)]
struct PatternDefinition {
    tracks: Vec<TrackDefinition>,
}

impl PatternDefinition {
    fn to_pattern(self) -> Result<Pattern, ConfigError> {
        let tracks = self
            .tracks
            .into_iter()
            .map(|track| {
                let notes = track
                    .notes
                    .into_iter()
                    .map(|n| NoteEvent::new(n.note, n.start, n.duration, n.velocity))
                    .collect::<Result<Vec<NoteEvent>, SequenceError>>()?;
                Ok(Track {
                    channel: track.channel,
                    sound: track.sound,
                    notes,
                })
            })
            .collect::<Result<Vec<Track>, ConfigError>>()?;
        Ok(Pattern { tracks })
    }
}

/// Parses patterns from a YAML file. Each document in the file is one
/// pattern; the transport plays them in file order.
pub fn parse_patterns(file: &Path) -> Result<Vec<Pattern>, ConfigError> {
    let contents = fs::read_to_string(file)?;
    let mut patterns: Vec<Pattern> = Vec::new();
    for document in serde_yml::Deserializer::from_str(&contents) {
        patterns.push(PatternDefinition::deserialize(document)?.to_pattern()?);
    }
    Ok(patterns)
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use config::FileFormat;

    use super::*;
    use crate::looper::LoopState;

    #[test]
    fn test_engine_config_defaults() {
        let config: EngineConfig = Config::builder()
            .add_source(File::from_str("{}", FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        let engine = config.loop_settings().to_engine();
        assert_eq!(engine.state(), LoopState::Idle);
        assert_eq!(engine.window().duration(), 4.0);
        assert_eq!(engine.fade_in_duration(), DEFAULT_FADE_IN);
        assert_eq!(config.voices().max_overlap_voices(), 8);
        assert_eq!(config.transport().ahead_count(), 2);
    }

    #[test]
    fn test_engine_config_full() {
        let yaml = r#"
            loop:
              start: 1.0
              end: 5.0
              max_loops: 4
              quantize: sixteenth
              swing: 0.5
              crossfade: 0.25
              original_tempo: 120
              target_tempo: 60
            voices:
              max_overlap_voices: 4
              max_polyphony: 12
            transport:
              ahead_count: 3
        "#;
        let config: EngineConfig = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        let engine = config.loop_settings().to_engine();
        let window = engine.window();
        assert_eq!(window.start(), 1.0);
        assert_eq!(window.end(), 5.0);
        assert_eq!(window.max_loops, Some(4));
        assert_eq!(window.quantize, Some(QuantizeGrid::Sixteenth));
        assert_eq!(window.swing, 0.5);
        assert_eq!(window.crossfade_duration, 0.25);
        // Halving the tempo doubles scheduled times.
        assert_eq!(window.tempo_ratio, 0.5);
        assert_eq!(config.voices().max_overlap_voices(), 4);
        assert_eq!(config.transport().ahead_count(), 3);
    }

    #[test]
    fn test_engine_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "loop:\n  end: 2.0").unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.loop_settings().to_engine().window().duration(), 2.0);
    }

    #[test]
    fn test_parse_patterns_multiple_documents() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            r#"
tracks:
  - channel: kick
    notes:
      - note: C1
        start: 0.0
        duration: 0.25
      - note: C1
        start: 1.0
        duration: 0.25
        velocity: 0.6
---
tracks:
  - channel: pad
    sound:
      allow_overlap: true
      playback_rate: 2.0
    notes:
      - note: E3
        start: 0.5
        duration: 1.5
"#
        )
        .unwrap();

        let patterns = parse_patterns(file.path()).unwrap();
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].tracks[0].channel, "kick");
        assert_eq!(patterns[0].tracks[0].notes.len(), 2);
        assert_eq!(patterns[0].tracks[0].notes[0].velocity, 0.8);
        assert_eq!(patterns[0].tracks[0].notes[1].velocity, 0.6);
        assert!(patterns[1].tracks[0].sound.allow_overlap);
        assert_eq!(patterns[1].tracks[0].sound.playback_rate, 2.0);
    }

    #[test]
    fn test_parse_patterns_rejects_invalid_timing() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            r#"
tracks:
  - channel: kick
    notes:
      - note: C1
        start: -1.0
        duration: 0.25
"#
        )
        .unwrap();

        assert!(parse_patterns(file.path()).is_err());
    }
}
