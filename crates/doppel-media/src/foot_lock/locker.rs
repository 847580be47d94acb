//! Pins planted feet to where they touched down.

use doppel_models::{
    ContactPhase, ContactRecord, ContactState, FootLockConfig, JointId, MotionTransform, Point2,
    PoseKeypoints, Segment,
};
use tracing::{debug, info, warn};

use super::contact::{classify, ground_line};
use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;
use crate::imaging::warp_region;
use crate::metrics;

/// Offsets smaller than this are left alone.
const MIN_CORRECTION_PX: f64 = 0.5;

/// Frames after foot locking plus the contact log.
#[derive(Debug, Clone)]
pub struct FootLockResult {
    pub frames: Vec<Frame>,
    /// One record per frame per ankle, in frame order
    pub records: Vec<ContactRecord>,
    pub corrections: usize,
}

/// Removes foot sliding during ground contact.
#[derive(Debug, Clone)]
pub struct FootLocker {
    config: FootLockConfig,
}

impl FootLocker {
    pub fn new(config: FootLockConfig) -> Self {
        Self { config }
    }

    /// Lock planted ankles within one segment's generated frames.
    ///
    /// Contact state starts fresh for every call. Frames whose ankle is
    /// missing are never corrected for that ankle.
    pub fn lock(
        &self,
        segment: &Segment,
        frames: Vec<Frame>,
        keypoints: &[Option<PoseKeypoints>],
    ) -> MediaResult<FootLockResult> {
        if keypoints.len() != frames.len() {
            return Err(MediaError::FrameCountMismatch {
                expected: frames.len(),
                actual: keypoints.len(),
            });
        }
        if !self.config.enabled || frames.is_empty() {
            return Ok(FootLockResult {
                frames,
                records: Vec::new(),
                corrections: 0,
            });
        }

        let tracks: Vec<(JointId, Vec<Option<Point2>>)> = JointId::ANKLES
            .iter()
            .map(|&joint| {
                let track = keypoints
                    .iter()
                    .map(|kp| {
                        kp.as_ref()
                            .and_then(|k| k.confident(joint, self.config.min_confidence))
                    })
                    .collect();
                (joint, track)
            })
            .collect();

        let Some(ground_y) = ground_line(tracks.iter().map(|(_, t)| t.as_slice())) else {
            warn!(
                segment = segment.index,
                "No confident ankle keypoints in segment, skipping foot lock"
            );
            let records = unknown_records(segment, &frames);
            return Ok(FootLockResult {
                frames,
                records,
                corrections: 0,
            });
        };

        let height = frames[0].height();
        let phases: Vec<Vec<ContactPhase>> = tracks
            .iter()
            .map(|(_, track)| classify(track, ground_y, height, &self.config))
            .collect();

        let mut states = vec![ContactState::default(); tracks.len()];
        // set when an ankle went unseen while its contact was held
        let mut bridged = vec![false; tracks.len()];
        let mut records = Vec::with_capacity(frames.len() * tracks.len());
        let mut corrections = 0;
        let mut out = Vec::with_capacity(frames.len());

        for (i, frame) in frames.into_iter().enumerate() {
            let mut image = frame.image;
            for (a, (joint, track)) in tracks.iter().enumerate() {
                let observed = track[i];
                let phase = phases[a][i];
                let state = &mut states[a];
                let mut corrected = observed;

                match (phase, observed) {
                    (ContactPhase::InContact, Some(obs)) => {
                        let resumed = std::mem::take(&mut bridged[a]);
                        let drifted = state
                            .locked_position
                            .is_some_and(|p| p.distance(&obs) > self.config.velocity_threshold);
                        if state.in_contact && resumed && drifted {
                            state.reset();
                            debug!(
                                frame = frame.index,
                                joint = %joint,
                                "Ankle resumed away from its lock after a detection gap"
                            );
                        }
                        if !state.in_contact {
                            state.enter(frame.index, obs);
                            debug!(frame = frame.index, joint = %joint, "Contact start");
                        } else if let Some(target) = state.locked_position {
                            let (dx, dy) = (target.x - obs.x, target.y - obs.y);
                            let offset = dx.hypot(dy);
                            if offset >= MIN_CORRECTION_PX {
                                let center = Point2::new(obs.x + dx / 2.0, obs.y + dy / 2.0);
                                image = warp_region(
                                    &image,
                                    &MotionTransform::translation(dx, dy),
                                    center,
                                    self.config.region_radius as f64 + offset,
                                    self.config.blend_ratio,
                                )?;
                                let blend = self.config.blend_ratio;
                                corrected = Some(Point2::new(obs.x + blend * dx, obs.y + blend * dy));
                                corrections += 1;
                            }
                        }
                    }
                    (ContactPhase::Free, _) => {
                        if state.in_contact {
                            debug!(frame = frame.index, joint = %joint, "Contact end");
                        }
                        state.reset();
                        bridged[a] = false;
                    }
                    // unknown frames keep the state, but the lock is re-checked on return
                    _ => bridged[a] |= state.in_contact,
                }

                records.push(ContactRecord {
                    segment: segment.index,
                    frame: frame.index,
                    joint: *joint,
                    phase,
                    observed,
                    locked: state.locked_position.filter(|_| state.in_contact),
                    corrected,
                });
            }
            out.push(Frame {
                index: frame.index,
                timestamp: frame.timestamp,
                image,
            });
        }

        metrics::record_foot_corrections(corrections);
        info!(
            segment = segment.index,
            corrections,
            ground_y,
            "Foot lock applied"
        );
        Ok(FootLockResult {
            frames: out,
            records,
            corrections,
        })
    }
}

fn unknown_records(segment: &Segment, frames: &[Frame]) -> Vec<ContactRecord> {
    frames
        .iter()
        .flat_map(|f| {
            JointId::ANKLES.iter().map(move |&joint| ContactRecord {
                segment: segment.index,
                frame: f.index,
                joint,
                phase: ContactPhase::Unknown,
                observed: None,
                locked: None,
                corrected: None,
            })
        })
        .collect()
}
