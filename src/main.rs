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
use std::collections::BTreeSet;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{crate_version, Parser, Subcommand};

use looptrack::clock::SystemClock;
use looptrack::config::{parse_patterns, EngineConfig};
use looptrack::context::AudioEngineContext;
use looptrack::events::EngineEvent;
use looptrack::patches::{Patch, StaticPatchStore};
use looptrack::renderer::mock::MockRenderer;
use looptrack::transport::{StartStatus, TransportScheduler};

/// The source duration assumed for every channel when running against the
/// diagnostic renderer, which has no sample library.
const DIAGNOSTIC_PATCH_DURATION: f64 = 1.0;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A real-time loop sequencing engine."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parses and verifies a pattern file.
    Patterns {
        /// The path to the pattern file.
        path: String,
    },
    /// Verifies an engine config file.
    Check {
        /// The path to the engine config.
        config_path: String,
    },
    /// Plays a pattern file through the diagnostic renderer, logging every
    /// scheduled event instead of producing sound.
    Play {
        /// The path to the engine config.
        config_path: String,
        /// The path to the pattern file.
        patterns_path: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Patterns { path } => {
            let patterns = parse_patterns(&PathBuf::from(&path))?;

            if patterns.is_empty() {
                println!("No patterns found in {}.", path.as_str());
                return Ok(());
            }

            println!("Patterns (count: {}):", patterns.len());
            for (i, pattern) in patterns.iter().enumerate() {
                let notes: usize = pattern.tracks.iter().map(|t| t.notes.len()).sum();
                println!("- pattern {}: {} tracks, {} notes", i, pattern.tracks.len(), notes);
            }

            let mut channels: BTreeSet<String> = BTreeSet::new();
            for pattern in patterns.iter() {
                for track in pattern.tracks.iter() {
                    channels.insert(track.channel.clone());
                }
            }
            println!("\nChannels (count: {}):", channels.len());
            for channel in channels.iter() {
                println!("- {}", channel);
            }
        }
        Commands::Check { config_path } => {
            let config = EngineConfig::load(&PathBuf::from(config_path))?;
            let engine = config.loop_settings().to_engine();
            let status = engine.status();

            println!("Loop window: [{}, {}) ({}s)", status.start, status.end, status.duration);
            match status.max_loops {
                Some(max_loops) => println!("Loops: {}", max_loops),
                None => println!("Loops: infinite"),
            }
            println!("Crossfade: {}", if status.crossfade_enabled { "on" } else { "off" });
            println!("Overlap voice cap: {}", config.voices().max_overlap_voices());
            println!("Ahead count: {}", config.transport().ahead_count());
        }
        Commands::Play {
            config_path,
            patterns_path,
        } => {
            let config = EngineConfig::load(&PathBuf::from(config_path))?;
            let patterns = parse_patterns(&PathBuf::from(patterns_path))?;

            // The diagnostic renderer has no sample library, so every channel
            // referenced by the patterns gets a placeholder patch.
            let patches = StaticPatchStore::new();
            for pattern in patterns.iter() {
                for track in pattern.tracks.iter() {
                    patches.insert(
                        track.channel.clone(),
                        Patch {
                            id: format!("{}.wav", track.channel),
                            duration: DIAGNOSTIC_PATCH_DURATION,
                        },
                    );
                }
            }

            let context = AudioEngineContext::new(
                Arc::new(SystemClock::new()),
                Arc::new(MockRenderer::new()),
                Arc::new(patches),
                Arc::new(config.voices().to_governor()),
            );
            let monitor = context.spawn_level_monitor();
            let events = context.events.subscribe();

            let transport = TransportScheduler::new(
                context.clone(),
                config.loop_settings().to_engine(),
                config.transport().ahead_count(),
                config.voices().max_overlap_voices(),
            );

            match transport.play_all(patterns).await {
                StartStatus::Started { at } => println!("Playback started at {:.3}s.", at),
                StartStatus::NoNotes => {
                    println!("Nothing to play.");
                    monitor.abort();
                    return Ok(());
                }
                status => return Err(format!("unable to start playback: {:?}", status).into()),
            }

            // Block on the event stream until the transport reports that the
            // final pattern has stopped.
            tokio::task::spawn_blocking(move || {
                while let Ok(event) = events.recv() {
                    match event {
                        EngineEvent::SamplerPlayback {
                            channel,
                            start_time,
                            duration,
                            ..
                        } => {
                            println!("- {} at {:.3}s for {:.3}s", channel, start_time, duration)
                        }
                        EngineEvent::SequencePlaybackChanged { pattern_index, .. } => {
                            println!("Now playing pattern {}.", pattern_index)
                        }
                        EngineEvent::TransportStop => break,
                    }
                }
            })
            .await?;

            transport.teardown().await;
            monitor.abort();
            println!("Playback finished.");
        }
    }

    Ok(())
}
