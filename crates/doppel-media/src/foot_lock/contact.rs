//! Ground contact classification for one ankle track.

use doppel_models::{ContactPhase, FootLockConfig, Point2};

/// Estimated ground line: the lowest confident ankle position in the segment.
pub fn ground_line<'a>(tracks: impl IntoIterator<Item = &'a [Option<Point2>]>) -> Option<f64> {
    tracks
        .into_iter()
        .flat_map(|t| t.iter().flatten())
        .map(|p| p.y)
        .filter(|y| y.is_finite())
        .fold(None, |acc: Option<f64>, y| Some(acc.map_or(y, |a| a.max(y))))
}

/// Classify every frame of an ankle track.
///
/// Missing observations are [`ContactPhase::Unknown`] and are skipped when
/// measuring velocity, so a gap in detection neither starts nor ends a
/// contact run. Displacement across a gap is compared to the threshold as
/// if it happened in one frame: a step taken while the detector was blind
/// must not average out to a slow foot. The first observation has no
/// velocity and counts as free.
pub fn classify(
    track: &[Option<Point2>],
    ground_y: f64,
    frame_height: u32,
    config: &FootLockConfig,
) -> Vec<ContactPhase> {
    let max_height = config.height_threshold * frame_height as f64;
    let mut last: Option<Point2> = None;
    let mut phases: Vec<ContactPhase> = track
        .iter()
        .map(|obs| {
            let Some(p) = *obs else {
                return ContactPhase::Unknown;
            };
            let phase = match last {
                Some(q) => {
                    let velocity = p.distance(&q);
                    let near_ground = ground_y - p.y <= max_height;
                    if velocity < config.velocity_threshold && near_ground {
                        ContactPhase::InContact
                    } else {
                        ContactPhase::Free
                    }
                }
                None => ContactPhase::Free,
            };
            last = Some(p);
            phase
        })
        .collect();
    extend_short_runs(&mut phases, config.min_contact_frames, config.extension_frames);
    phases
}

/// Grow contact runs shorter than `min_frames` by `margin` known frames on
/// each side. Unknown frames are neither counted nor converted.
pub fn extend_short_runs(phases: &mut [ContactPhase], min_frames: usize, margin: usize) {
    if margin == 0 {
        return;
    }
    let known: Vec<usize> = phases
        .iter()
        .enumerate()
        .filter(|(_, p)| **p != ContactPhase::Unknown)
        .map(|(i, _)| i)
        .collect();

    // runs as [start, end) positions into `known`, measured before any extension
    let mut runs = Vec::new();
    let mut k = 0;
    while k < known.len() {
        if phases[known[k]] == ContactPhase::InContact {
            let start = k;
            while k < known.len() && phases[known[k]] == ContactPhase::InContact {
                k += 1;
            }
            runs.push((start, k));
        } else {
            k += 1;
        }
    }

    for (start, end) in runs {
        if end - start >= min_frames {
            continue;
        }
        let lo = start.saturating_sub(margin);
        let hi = (end + margin).min(known.len());
        for &i in &known[lo..hi] {
            phases[i] = ContactPhase::InContact;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ContactPhase::{Free, InContact, Unknown};

    fn config() -> FootLockConfig {
        FootLockConfig {
            extension_frames: 0,
            ..Default::default()
        }
    }

    fn track(ys: &[Option<(f64, f64)>]) -> Vec<Option<Point2>> {
        ys.iter().map(|o| o.map(|(x, y)| Point2::new(x, y))).collect()
    }

    #[test]
    fn test_ground_line_is_lowest_ankle() {
        let left = track(&[Some((0.0, 90.0)), None]);
        let right = track(&[Some((0.0, 95.5)), Some((0.0, 80.0))]);
        assert_eq!(ground_line([left.as_slice(), right.as_slice()]), Some(95.5));
        assert_eq!(ground_line([track(&[None]).as_slice()]), None);
    }

    #[test]
    fn test_slow_low_ankle_is_in_contact() {
        let t = track(&[
            Some((10.0, 100.0)),
            Some((11.0, 100.0)),
            Some((12.0, 99.0)),
            Some((30.0, 99.0)),
            Some((31.0, 60.0)),
        ]);
        let phases = classify(&t, 100.0, 200, &config());
        assert_eq!(phases, vec![Free, InContact, InContact, Free, Free]);
    }

    #[test]
    fn test_slow_but_raised_ankle_is_free() {
        let t = track(&[Some((10.0, 50.0)), Some((10.0, 50.0))]);
        let phases = classify(&t, 100.0, 200, &config());
        // 50px above ground, threshold is 20px
        assert_eq!(phases, vec![Free, Free]);
    }

    #[test]
    fn test_missing_frames_are_unknown_and_skipped() {
        let t = track(&[Some((10.0, 100.0)), None, None, Some((14.0, 100.0))]);
        let phases = classify(&t, 100.0, 200, &config());
        // 4px across the gap is still under the threshold
        assert_eq!(phases, vec![Free, Unknown, Unknown, InContact]);
    }

    #[test]
    fn test_step_hidden_by_gap_is_free() {
        let mut ys = vec![Some((40.0, 100.0)); 3];
        ys.extend([None; 10]);
        ys.extend([Some((80.0, 100.0)); 3]);
        let phases = classify(&track(&ys), 100.0, 200, &config());
        // 40px over 11 frames would look slow if averaged
        assert_eq!(phases[13], Free);
        assert_eq!(&phases[14..], &[InContact, InContact]);
        assert_eq!(&phases[1..3], &[InContact, InContact]);
    }

    #[test]
    fn test_short_runs_extend_over_known_frames() {
        let mut phases = vec![Free, Free, Unknown, InContact, Free, Free];
        extend_short_runs(&mut phases, 3, 1);
        assert_eq!(phases, vec![Free, InContact, Unknown, InContact, InContact, Free]);

        let mut long = vec![Free, InContact, InContact, InContact, Free];
        extend_short_runs(&mut long, 3, 1);
        assert_eq!(long, vec![Free, InContact, InContact, InContact, Free]);
    }
}
