/// States of the worker's connection lifecycle.
///
/// One cycle serves exactly one client:
/// `ConnectToMaster → WaitForJob → ConnectToClient → ProcessJob →
/// DisconnectClient → ConnectToMaster`. Any I/O failure lands in
/// `DisconnectClient`; a latched stop request lands in `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    ConnectToMaster,
    WaitForJob,
    ConnectToClient,
    ProcessJob,
    DisconnectClient,
    Stopped,
}

impl ConnectState {
    /// Whether the machine may move from `self` to `next`.
    pub fn allows(self, next: ConnectState) -> bool {
        use ConnectState::*;
        // Stop is latched and honored at every state boundary.
        if next == Stopped {
            return true;
        }
        // Any I/O failure funnels into DisconnectClient.
        if next == DisconnectClient {
            return self != Stopped;
        }
        matches!(
            (self, next),
            (ConnectToMaster, ConnectToMaster)
                | (ConnectToMaster, WaitForJob)
                | (WaitForJob, ConnectToMaster)
                | (WaitForJob, ConnectToClient)
                | (ConnectToClient, ConnectToMaster)
                | (ConnectToClient, ProcessJob)
                | (ProcessJob, ProcessJob)
                | (DisconnectClient, ConnectToMaster)
        )
    }
}

impl std::fmt::Display for ConnectState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConnectState::ConnectToMaster => "CONNECT_TO_MASTER",
            ConnectState::WaitForJob => "WAIT_FOR_JOB",
            ConnectState::ConnectToClient => "CONNECT_TO_CLIENT",
            ConnectState::ProcessJob => "PROCESS_JOB",
            ConnectState::DisconnectClient => "DISCONNECT_CLIENT",
            ConnectState::Stopped => "STOPPED",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectState::*;

    #[test]
    fn cycle_transitions_are_legal() {
        assert!(ConnectToMaster.allows(WaitForJob));
        assert!(WaitForJob.allows(ConnectToClient));
        assert!(ConnectToClient.allows(ProcessJob));
        assert!(ProcessJob.allows(DisconnectClient));
        assert!(DisconnectClient.allows(ConnectToMaster));
    }

    #[test]
    fn failure_and_stop_transitions() {
        assert!(WaitForJob.allows(ConnectToMaster));
        assert!(ConnectToClient.allows(ConnectToMaster));
        assert!(ProcessJob.allows(Stopped));
        assert!(ConnectToMaster.allows(Stopped));
        assert!(WaitForJob.allows(DisconnectClient));
    }

    #[test]
    fn illegal_jumps_are_rejected() {
        assert!(!ConnectToMaster.allows(ProcessJob));
        assert!(!DisconnectClient.allows(ProcessJob));
        assert!(!ProcessJob.allows(WaitForJob));
        assert!(!Stopped.allows(ConnectToMaster));
        assert!(!Stopped.allows(DisconnectClient));
    }
}
