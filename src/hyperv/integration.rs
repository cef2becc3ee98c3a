use std::fmt;
use std::str::FromStr;

use super::{HyperV, script};
use crate::error::HvError;
use crate::executor::Executor;

/// Guest integration services Hyper-V can toggle per VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegrationService {
    TimeSynchronization,
    Heartbeat,
    KeyValuePairExchange,
    Shutdown,
    Vss,
    GuestServiceInterface,
}

impl IntegrationService {
    pub const ALL: [IntegrationService; 6] = [
        IntegrationService::TimeSynchronization,
        IntegrationService::Heartbeat,
        IntegrationService::KeyValuePairExchange,
        IntegrationService::Shutdown,
        IntegrationService::Vss,
        IntegrationService::GuestServiceInterface,
    ];

    /// Display name as Hyper-V reports it.
    pub fn name(self) -> &'static str {
        match self {
            IntegrationService::TimeSynchronization => "Time Synchronization",
            IntegrationService::Heartbeat => "Heartbeat",
            IntegrationService::KeyValuePairExchange => "Key-Value Pair Exchange",
            IntegrationService::Shutdown => "Shutdown",
            IntegrationService::Vss => "VSS",
            IntegrationService::GuestServiceInterface => "Guest Service Interface",
        }
    }

    /// Service id. Stable across host locales, unlike the display name.
    pub fn id(self) -> &'static str {
        match self {
            IntegrationService::TimeSynchronization => "2497F4DE-E9FA-4204-80E4-4B75C46419C0",
            IntegrationService::Heartbeat => "84EAAE65-2F2E-45F5-9BB5-0E857DC8EB47",
            IntegrationService::KeyValuePairExchange => "2A34B1C2-FD73-4043-8A5B-DD2159BC743F",
            IntegrationService::Shutdown => "9F8233AC-BE49-4C79-8EE3-E7E1985B2077",
            IntegrationService::Vss => "5CED1297-4598-4915-A5FC-AD21BB4D02A4",
            IntegrationService::GuestServiceInterface => "6C09BB55-D683-4DA0-8931-C9BF705F6480",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, HvError> {
        Self::ALL
            .into_iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| HvError::UnknownIntegrationService { name: name.into() })
    }
}

impl FromStr for IntegrationService {
    type Err = HvError;

    fn from_str(s: &str) -> Result<Self, HvError> {
        Self::from_name(s)
    }
}

impl fmt::Display for IntegrationService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl<E: Executor> HyperV<E> {
    pub async fn enable_integration_service(
        &self,
        vm_name: &str,
        service: IntegrationService,
    ) -> Result<(), HvError> {
        let script = script(
            "Get-VMIntegrationService -VMName $vmName | ?{$_.Id -match $integrationServiceId} | Enable-VMIntegrationService\n",
            [("vmName", vm_name), ("integrationServiceId", service.id())],
        )?;
        self.run(script).await?;
        tracing::debug!(vm_name, service = %service, "enabled integration service");
        Ok(())
    }
}
