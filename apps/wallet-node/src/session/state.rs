/// DKG session phases. Once a session leaves `Proposed`, its group
/// parameters are frozen.
#[derive(Debug, PartialEq, Clone)]
pub enum DkgState {
    Idle,
    Proposed,
    AwaitingAcceptances,
    MeshForming,
    Round1InProgress,
    Round1Complete,
    Round2InProgress,
    Round2Complete,
    Finalizing,
    Complete,
    Failed(String),
}

impl DkgState {
    pub fn display_status(&self) -> String {
        match self {
            DkgState::Idle => "Idle".to_string(),
            DkgState::Proposed => "Proposed".to_string(),
            DkgState::AwaitingAcceptances => "Awaiting Acceptances".to_string(),
            DkgState::MeshForming => "Mesh Forming".to_string(),
            DkgState::Round1InProgress => "Round 1 In Progress".to_string(),
            DkgState::Round1Complete => "Round 1 Complete".to_string(),
            DkgState::Round2InProgress => "Round 2 In Progress".to_string(),
            DkgState::Round2Complete => "Round 2 Complete".to_string(),
            DkgState::Finalizing => "Finalizing".to_string(),
            DkgState::Complete => "DKG Complete".to_string(),
            DkgState::Failed(reason) => format!("Failed: {reason}"),
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, DkgState::Idle | DkgState::Complete | DkgState::Failed(_))
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, DkgState::Complete)
    }

    /// Ordering rank used to classify out-of-phase messages: a message for
    /// a later phase is buffered, one for an earlier phase is dropped.
    pub fn rank(&self) -> u8 {
        match self {
            DkgState::Idle => 0,
            DkgState::Proposed => 1,
            DkgState::AwaitingAcceptances => 2,
            DkgState::MeshForming => 3,
            DkgState::Round1InProgress => 4,
            DkgState::Round1Complete => 5,
            DkgState::Round2InProgress => 6,
            DkgState::Round2Complete => 7,
            DkgState::Finalizing => 8,
            DkgState::Complete => 9,
            DkgState::Failed(_) => 10,
        }
    }
}

/// Signing session phases. Participants that are not selected observe from
/// `SignerSelection` onward without contributing shares.
#[derive(Debug, PartialEq, Clone)]
pub enum SigningState {
    Idle,
    Requested,
    AcceptancePhase,
    SignerSelection,
    CommitmentPhase,
    SharePhase,
    AggregationPhase,
    Complete,
    Failed(String),
}

impl SigningState {
    pub fn display_status(&self) -> String {
        match self {
            SigningState::Idle => "Idle".to_string(),
            SigningState::Requested => "Requested".to_string(),
            SigningState::AcceptancePhase => "Awaiting Acceptance".to_string(),
            SigningState::SignerSelection => "Signer Selection".to_string(),
            SigningState::CommitmentPhase => "Commitment Phase".to_string(),
            SigningState::SharePhase => "Share Phase".to_string(),
            SigningState::AggregationPhase => "Aggregation Phase".to_string(),
            SigningState::Complete => "Complete".to_string(),
            SigningState::Failed(reason) => format!("Failed: {reason}"),
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            SigningState::Idle | SigningState::Complete | SigningState::Failed(_)
        )
    }

    pub fn rank(&self) -> u8 {
        match self {
            SigningState::Idle => 0,
            SigningState::Requested => 1,
            SigningState::AcceptancePhase => 2,
            SigningState::SignerSelection => 3,
            SigningState::CommitmentPhase => 4,
            SigningState::SharePhase => 5,
            SigningState::AggregationPhase => 6,
            SigningState::Complete => 7,
            SigningState::Failed(_) => 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dkg_activity_classification() {
        assert!(!DkgState::Idle.is_active());
        assert!(DkgState::Round1InProgress.is_active());
        assert!(DkgState::Finalizing.is_active());
        assert!(!DkgState::Complete.is_active());
        assert!(!DkgState::Failed("x".into()).is_active());
        assert!(DkgState::Complete.is_completed());
    }

    #[test]
    fn test_phase_ranks_are_monotonic() {
        let phases = [
            DkgState::Idle,
            DkgState::Proposed,
            DkgState::AwaitingAcceptances,
            DkgState::MeshForming,
            DkgState::Round1InProgress,
            DkgState::Round1Complete,
            DkgState::Round2InProgress,
            DkgState::Round2Complete,
            DkgState::Finalizing,
            DkgState::Complete,
        ];
        for window in phases.windows(2) {
            assert!(window[0].rank() < window[1].rank());
        }
    }
}
