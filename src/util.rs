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

/// The tempo used when a configured tempo is missing or non-positive.
pub const FALLBACK_TEMPO: f64 = 120.0;

/// The duration of one beat in seconds at the given tempo.
pub fn beat_duration(tempo: f64) -> f64 {
    if tempo.is_finite() && tempo > 0.0 {
        60.0 / tempo
    } else {
        60.0 / FALLBACK_TEMPO
    }
}

/// Wraps a loop-relative position into `[0, loop_duration)`.
pub fn wrap_loop_position(position: f64, loop_duration: f64) -> f64 {
    if !position.is_finite() {
        return 0.0;
    }
    if !loop_duration.is_finite() || loop_duration <= 0.0 {
        return position.max(0.0);
    }
    let wrapped = position % loop_duration;
    if wrapped < 0.0 {
        wrapped + loop_duration
    } else {
        wrapped
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_beat_duration() {
        assert_eq!(beat_duration(120.0), 0.5);
        assert_eq!(beat_duration(60.0), 1.0);
        // Invalid tempos fall back to 120 BPM.
        assert_eq!(beat_duration(0.0), 0.5);
        assert_eq!(beat_duration(f64::NAN), 0.5);
    }

    #[test]
    fn test_wrap_loop_position() {
        assert_eq!(wrap_loop_position(1.5, 4.0), 1.5);
        assert_eq!(wrap_loop_position(5.0, 4.0), 1.0);
        assert_eq!(wrap_loop_position(-0.5, 4.0), 3.5);
        assert_eq!(wrap_loop_position(f64::NAN, 4.0), 0.0);
        assert_eq!(wrap_loop_position(2.0, 0.0), 2.0);
    }
}
