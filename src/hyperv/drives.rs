//! DVD, floppy and virtual disk attachments.

use super::{HyperV, Generation, script};
use crate::error::HvError;
use crate::executor::Executor;

/// Where a drive sits on the VM's storage controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveSlot {
    pub controller_number: u32,
    pub controller_location: u32,
}

impl DriveSlot {
    fn params(self, vm_name: &str) -> [(&'static str, String); 3] {
        [
            ("vmName", vm_name.to_string()),
            ("controllerNumber", self.controller_number.to_string()),
            ("controllerLocation", self.controller_location.to_string()),
        ]
    }
}

const FIND_DVD_DRIVE: &str = r#"
$vmDvdDrive = Get-VMDvdDrive -VMName $vmName -ControllerNumber ([int]$controllerNumber) -ControllerLocation ([int]$controllerLocation)
if (!$vmDvdDrive) { throw 'unable to find dvd drive' }
"#;

/// Parse `"<number>,<location>"`.
fn parse_slot(output: &str) -> Result<DriveSlot, HvError> {
    let bad = |reason: String| HvError::unexpected_output("create_dvd_drive", output, reason);
    let (number, location) = output
        .trim()
        .split_once(',')
        .ok_or_else(|| bad("expected controller number and location".into()))?;
    let controller_number = number.trim().parse().map_err(|e| bad(format!("{e}")))?;
    let controller_location = location.trim().parse().map_err(|e| bad(format!("{e}")))?;
    Ok(DriveSlot {
        controller_number,
        controller_location,
    })
}

impl<E: Executor> HyperV<E> {
    /// Add a DVD drive (left empty) and return its slot.
    pub async fn create_dvd_drive(&self, vm_name: &str, iso_path: &str) -> Result<DriveSlot, HvError> {
        let script = script(
            r#"
$dvd = Add-VMDvdDrive -VMName $vmName -Path $isoPath -Passthru
$dvd | Set-VMDvdDrive -Path $null
"$($dvd.ControllerNumber),$($dvd.ControllerLocation)"
"#,
            [("vmName", vm_name), ("isoPath", iso_path)],
        )?;
        let out = self.output(script).await?;
        parse_slot(&out)
    }

    pub async fn mount_dvd_drive(&self, vm_name: &str, path: &str, slot: DriveSlot) -> Result<(), HvError> {
        let mut params = slot.params(vm_name).to_vec();
        params.push(("path", path.to_string()));
        let body = format!(
            "{FIND_DVD_DRIVE}Set-VMDvdDrive -VMName $vmName -ControllerNumber ([int]$controllerNumber) -ControllerLocation ([int]$controllerLocation) -Path $path\n"
        );
        self.run(script(&body, params)?).await
    }

    pub async fn unmount_dvd_drive(&self, vm_name: &str, slot: DriveSlot) -> Result<(), HvError> {
        let body = format!(
            "{FIND_DVD_DRIVE}Set-VMDvdDrive -VMName $vmName -ControllerNumber ([int]$controllerNumber) -ControllerLocation ([int]$controllerLocation) -Path $null\n"
        );
        self.run(script(&body, slot.params(vm_name))?).await
    }

    /// Make the DVD drive the first boot device. Generation 1 VMs only know
    /// device classes, so the CD class goes first; generation 2 VMs point
    /// the firmware at the specific drive.
    pub async fn set_boot_dvd_drive(
        &self,
        vm_name: &str,
        slot: DriveSlot,
        generation: Generation,
    ) -> Result<(), HvError> {
        let script = match generation {
            Generation::One => script(
                "Set-VMBios -VMName $vmName -StartupOrder @('CD', 'IDE', 'LegacyNetworkAdapter', 'Floppy')\n",
                [("vmName", vm_name)],
            )?,
            Generation::Two => script(
                &format!(
                    "{FIND_DVD_DRIVE}Set-VMFirmware -VMName $vmName -FirstBootDevice $vmDvdDrive -ErrorAction SilentlyContinue\n"
                ),
                slot.params(vm_name),
            )?,
        };
        self.run(script).await
    }

    pub async fn delete_dvd_drive(&self, vm_name: &str, slot: DriveSlot) -> Result<(), HvError> {
        let body = format!(
            "{FIND_DVD_DRIVE}Remove-VMDvdDrive -VMName $vmName -ControllerNumber ([int]$controllerNumber) -ControllerLocation ([int]$controllerLocation)\n"
        );
        self.run(script(&body, slot.params(vm_name))?).await
    }

    pub async fn delete_all_dvd_drives(&self, vm_name: &str) -> Result<(), HvError> {
        let script = script(
            "Get-VMDvdDrive -VMName $vmName | Remove-VMDvdDrive\n",
            [("vmName", vm_name)],
        )?;
        self.run(script).await
    }

    pub async fn mount_floppy_drive(&self, vm_name: &str, path: &str) -> Result<(), HvError> {
        let script = script(
            "Set-VMFloppyDiskDrive -VMName $vmName -Path $path\n",
            [("vmName", vm_name), ("path", path)],
        )?;
        self.run(script).await
    }

    pub async fn unmount_floppy_drive(&self, vm_name: &str) -> Result<(), HvError> {
        let script = script(
            "Set-VMFloppyDiskDrive -VMName $vmName -Path $null\n",
            [("vmName", vm_name)],
        )?;
        self.run(script).await
    }

    /// Create `<vhd_name>.vhdx` next to the VM's configuration, attach it,
    /// and return its path.
    pub async fn new_vhd(&self, vm_id: &str, vhd_name: &str, size_bytes: u64) -> Result<String, HvError> {
        let script = script(
            r#"
$vm = Get-VM -Id $vmId | Select-Object -First 1
if (!$vm) { Write-Error "Creating VHD for VM ID: $vmId, cannot find VM"; return }
$vhdPath = Join-Path -Path $vm.ConfigurationLocation -ChildPath ($vhdName + '.vhdx')
$vhd = New-VHD -Path $vhdPath -SizeBytes ([long]$sizeBytes)
Add-VMHardDiskDrive -VM $vm -Path $vhd.Path
$vhd.Path
"#,
            [
                ("vmId", vm_id.to_string()),
                ("vhdName", vhd_name.to_string()),
                ("sizeBytes", size_bytes.to_string()),
            ],
        )?;
        self.output(script).await
    }

    /// Download a prepared disk from `source` (a URL) to `<vm id>.vhdx` next
    /// to the VM's configuration and attach it. Returns the disk path.
    pub async fn attach_boot_vhd(&self, vm_id: &str, source: &str) -> Result<String, HvError> {
        let script = script(
            r#"
$vm = Get-VM -Id $vmId | Select-Object -First 1
if (!$vm) { Write-Error "Attaching boot VHD for VM ID: $vmId, cannot find VM"; return }
$vhdPath = Join-Path -Path $vm.ConfigurationLocation -ChildPath ($vm.Id.Guid + '.vhdx')
(New-Object System.Net.WebClient).DownloadFile($source, $vhdPath)
Add-VMHardDiskDrive -VM $vm -Path $vhdPath
$vhdPath
"#,
            [("vmId", vm_id), ("source", source)],
        )?;
        let path = self.output(script).await?;
        tracing::info!(vm_id, path = %path, "attached boot disk");
        Ok(path)
    }
}
