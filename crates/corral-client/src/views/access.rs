//! Permission checks and grants

use corral_core::CorralError;
use corral_protocol::Request;

use crate::gate::Gate;

/// Access control requests
#[derive(Clone, Copy)]
pub struct Access<'a> {
    gate: &'a Gate,
}

impl<'a> Access<'a> {
    pub(crate) fn new(gate: &'a Gate) -> Self {
        Self { gate }
    }

    /// Whether `subject` holds `permission`
    pub async fn check(
        &self,
        subject: impl Into<String>,
        permission: impl Into<String>,
    ) -> Result<bool, CorralError> {
        let request = Request::AccessCheck {
            subject: subject.into(),
            permission: permission.into(),
        };
        self.gate.exchange(request, |reply| reply.read()).await
    }

    pub async fn grant(
        &self,
        subject: impl Into<String>,
        permission: impl Into<String>,
    ) -> Result<(), CorralError> {
        self.gate
            .exchange_unit(Request::AccessGrant {
                subject: subject.into(),
                permission: permission.into(),
            })
            .await
    }

    pub async fn revoke(
        &self,
        subject: impl Into<String>,
        permission: impl Into<String>,
    ) -> Result<(), CorralError> {
        self.gate
            .exchange_unit(Request::AccessRevoke {
                subject: subject.into(),
                permission: permission.into(),
            })
            .await
    }
}
