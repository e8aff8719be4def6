use crate::annotation::overlay::Overlay;
use crate::detection::domain::calibration::CameraCalibration;
use crate::detection::domain::marker_detector::MarkerDetector;
use crate::detection::domain::marker_pose::{estimate_pose, project_axes};
use crate::detection::domain::marker_tracker::{MarkerEvent, MarkerTracker};
use crate::pipeline::pipeline_logger::PipelineLogger;
use crate::shared::frame::Frame;

/// What one invocation saw.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MarkerStageReport {
    pub ids: Vec<u32>,
    pub poses: usize,
    pub events: Vec<MarkerEvent>,
}

/// Detects fiducial markers, draws their outline and pose axes, and feeds
/// the ids to the temporal tracker.
pub struct MarkerTrackingStage {
    detector: Box<dyn MarkerDetector>,
    calibration: CameraCalibration,
    marker_length: f64,
    tracker: MarkerTracker,
}

impl MarkerTrackingStage {
    pub fn new(
        detector: Box<dyn MarkerDetector>,
        calibration: CameraCalibration,
        marker_length: f64,
        tracker: MarkerTracker,
    ) -> Self {
        Self {
            detector,
            calibration,
            marker_length,
            tracker,
        }
    }

    pub fn tracker(&self) -> &MarkerTracker {
        &self.tracker
    }

    /// Runs on one frame. `gray` is the detection input, `annotated` the
    /// drawing target, `now` the monotonic time in seconds.
    ///
    /// A detector failure skips the frame entirely; the tracker is not fed
    /// so it does not age markers on a frame it never looked at.
    pub fn process(
        &mut self,
        gray: &Frame,
        annotated: &mut Frame,
        now: f64,
        overlay: &Overlay,
        logger: &mut dyn PipelineLogger,
    ) -> MarkerStageReport {
        let markers = match self.detector.detect(gray) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Marker detection failed on frame {}: {e}", gray.index());
                return MarkerStageReport::default();
            }
        };

        let mut poses = 0;
        for marker in &markers {
            let axes = estimate_pose(&marker.corners, &self.calibration, self.marker_length)
                .and_then(|pose| project_axes(&pose, &self.calibration, self.marker_length));
            if axes.is_some() {
                poses += 1;
            } else {
                log::debug!("No pose for marker {}", marker.id);
            }
            overlay.draw_marker(annotated, marker, axes.as_ref());
        }

        let ids: Vec<u32> = markers.iter().map(|m| m.id).collect();
        let events = self.tracker.observe(&ids, now);
        for event in &events {
            logger.marker_event(event);
        }
        logger.metric("markers", ids.len() as f64);

        MarkerStageReport { ids, poses, events }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::domain::calibration::tests::test_calibration;
    use crate::detection::domain::marker_detector::DetectedMarker;
    use crate::pipeline::pipeline_logger::NullPipelineLogger;
    use std::collections::VecDeque;

    /// Returns the scripted markers per call; `None` entries fail.
    struct ScriptedDetector {
        script: VecDeque<Option<Vec<DetectedMarker>>>,
    }

    impl MarkerDetector for ScriptedDetector {
        fn detect(
            &mut self,
            _: &Frame,
        ) -> Result<Vec<DetectedMarker>, Box<dyn std::error::Error>> {
            match self.script.pop_front() {
                Some(Some(markers)) => Ok(markers),
                Some(None) => Err("detector crashed".into()),
                None => Ok(Vec::new()),
            }
        }
    }

    #[derive(Default)]
    struct RecordingLogger {
        events: Vec<String>,
    }

    impl PipelineLogger for RecordingLogger {
        fn frame(&mut self, _: usize) {}
        fn timing(&mut self, _: &str, _: f64) {}
        fn metric(&mut self, _: &str, _: f64) {}
        fn marker_event(&mut self, event: &MarkerEvent) {
            self.events.push(event.to_string());
        }
        fn info(&mut self, _: &str) {}
    }

    /// A 100 px marker centred in a 640x480 view, about 0.3 m away.
    fn centred_marker(id: u32) -> DetectedMarker {
        DetectedMarker {
            id,
            corners: [[270.0, 190.0], [370.0, 190.0], [370.0, 290.0], [270.0, 290.0]],
        }
    }

    fn stage(script: Vec<Option<Vec<DetectedMarker>>>) -> MarkerTrackingStage {
        MarkerTrackingStage::new(
            Box::new(ScriptedDetector {
                script: script.into(),
            }),
            test_calibration(vec![0.0; 5]),
            0.05,
            MarkerTracker::new(2.0),
        )
    }

    fn blank() -> Frame {
        Frame::new(vec![0; 640 * 480 * 3], 640, 480, 3, 0)
    }

    #[test]
    fn test_marker_is_drawn_and_reported() {
        let mut stage = stage(vec![Some(vec![centred_marker(7)])]);
        let gray = blank().to_grayscale();
        let mut annotated = blank();
        let mut logger = RecordingLogger::default();

        let report = stage.process(&gray, &mut annotated, 0.0, &Overlay::new(None), &mut logger);

        assert_eq!(report.ids, vec![7]);
        assert_eq!(report.poses, 1);
        assert_eq!(report.events, vec![MarkerEvent::Appeared { id: 7 }]);
        assert_eq!(logger.events, vec!["marker 7 appeared".to_string()]);
        assert_ne!(annotated, blank());
    }

    #[test]
    fn test_disappearance_is_logged_after_timeout() {
        let mut script = vec![Some(vec![centred_marker(3)])];
        script.extend((0..30).map(|_| Some(Vec::new())));
        let mut stage = stage(script);
        let gray = blank().to_grayscale();
        let mut logger = RecordingLogger::default();

        for i in 0..31 {
            let mut annotated = blank();
            stage.process(&gray, &mut annotated, i as f64 * 0.1, &Overlay::new(None), &mut logger);
        }

        assert_eq!(logger.events.len(), 2);
        assert!(logger.events[1].contains("disappeared"));
        assert!(stage.tracker().memory().is_empty());
    }

    #[test]
    fn test_detector_failure_leaves_frame_and_tracker_untouched() {
        let mut stage = stage(vec![Some(vec![centred_marker(1)]), None]);
        let gray = blank().to_grayscale();
        let overlay = Overlay::new(None);
        let mut logger = NullPipelineLogger;

        let mut annotated = blank();
        stage.process(&gray, &mut annotated, 0.0, &overlay, &mut logger);
        let mut annotated = blank();
        let report = stage.process(&gray, &mut annotated, 5.0, &overlay, &mut logger);

        assert_eq!(report, MarkerStageReport::default());
        assert_eq!(annotated, blank());
        assert!(stage.tracker().memory().contains(1));
    }

    #[test]
    fn test_degenerate_corners_still_outlined_without_pose() {
        let flat = DetectedMarker {
            id: 9,
            corners: [[100.0, 100.0]; 4],
        };
        let mut stage = stage(vec![Some(vec![flat])]);
        let gray = blank().to_grayscale();
        let mut annotated = blank();

        let report = stage.process(
            &gray,
            &mut annotated,
            0.0,
            &Overlay::new(None),
            &mut NullPipelineLogger,
        );

        assert_eq!(report.ids, vec![9]);
        assert_eq!(report.poses, 0);
    }
}
