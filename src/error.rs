//! Error Types
//!
//! Recoverable errors reported to the caller at graph construction or decoding
//! time. Internal consistency violations are programming errors and panic
//! instead of going through this type.
//!

use super::util::*;
use thiserror::Error;

pub type MwpmResult<T> = Result<T, MwpmError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MwpmError {
    #[error("detector {index} exceeds the number of detectors {num_detectors}")]
    DetectorIndexOutOfRange { index: DetectorIndex, num_detectors: usize },
    #[error("observable {index} exceeds the number of observables {num_observables}")]
    ObservableIndexOutOfRange {
        index: ObservableIndex,
        num_observables: usize,
    },
    #[error("edge from detector {detector} to itself")]
    SelfLoop { detector: DetectorIndex },
    #[error("duplicate edge between detectors {detector_1} and {detector_2}, merge them before constructing the graph")]
    DuplicateEdge {
        detector_1: DetectorIndex,
        detector_2: DetectorIndex,
    },
    #[error("duplicate boundary edge on detector {detector}, merge them before constructing the graph")]
    DuplicateBoundaryEdge { detector: DetectorIndex },
    #[error("edge weight {weight} exceeds the maximum safe weight {max_safe_weight}, it may cause the decoder to overflow")]
    WeightOverflow { weight: Weight, max_safe_weight: Weight },
    #[error("edge between detectors {detector_1} and {detector_2} has odd weight {weight}, regions growing from both ends cannot meet at an integer time; use even weights like the discretizer produces")]
    OddEdgeWeight {
        detector_1: DetectorIndex,
        detector_2: DetectorIndex,
        weight: Weight,
    },
    #[error("error probability {probability} is outside the open interval (0, 1)")]
    InvalidErrorProbability { probability: f64 },
    #[error("an error mechanism must trigger one or two detectors, got {num_detectors}")]
    InvalidErrorMechanism { num_detectors: usize },
    #[error("discretization requires at least one weight level")]
    NoWeightLevels,
    #[error("detection event {detector} appears twice in the syndrome")]
    DuplicateDetectionEvent { detector: DetectorIndex },
    #[error("the syndrome cannot be perfectly matched, {unmatched} region(s) left unmatched")]
    UnmatchableSyndrome { unmatched: usize },
}

impl MwpmError {
    /// helper for the pervasive detector range check
    pub fn check_detector(index: DetectorIndex, num_detectors: usize) -> MwpmResult<()> {
        if index >= num_detectors {
            return Err(MwpmError::DetectorIndexOutOfRange { index, num_detectors });
        }
        Ok(())
    }

    pub fn check_observable(index: ObservableIndex, num_observables: usize) -> MwpmResult<()> {
        if index >= num_observables {
            return Err(MwpmError::ObservableIndexOutOfRange { index, num_observables });
        }
        Ok(())
    }
}
