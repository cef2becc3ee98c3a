//! Virtual machine lifecycle and settings.

use super::{HyperV, non_empty, parse_bool, parse_number, ps_bool, script};
use crate::error::HvError;
use crate::executor::Executor;

/// Hyper-V VM generation. Generation 1 boots from BIOS, generation 2 from UEFI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Generation {
    One,
    Two,
}

impl Generation {
    pub fn number(self) -> u8 {
        match self {
            Generation::One => 1,
            Generation::Two => 2,
        }
    }
}

impl TryFrom<u8> for Generation {
    type Error = HvError;

    fn try_from(value: u8) -> Result<Self, HvError> {
        match value {
            1 => Ok(Generation::One),
            2 => Ok(Generation::Two),
            other => Err(HvError::Validation {
                message: format!("VM generation must be 1 or 2 (got {other})"),
            }),
        }
    }
}

const STOP_IF_RUNNING: &str = r#"
$vm = Get-VM -Name $vmName -ErrorAction SilentlyContinue
if ($vm.State -eq [Microsoft.HyperV.PowerShell.VMState]::Running) {
  Stop-VM -Name $vmName -Force -Confirm:$false
}
"#;

/// Export the VM, then describe it in `box.xml` beside the exported
/// configuration: generation, CPU and memory, switch, drives per controller.
const EXPORT_VM: &str = r#"
Export-VM -Name $vmName -Path $path
if (Test-Path -Path ([IO.Path]::Combine($path, $vmName, 'Virtual Machines', '*.VMCX'))) {
  $vm = Get-VM -Name $vmName
  $adapter = Get-VMNetworkAdapter -VM $vm | Select-Object -First 1
  $box = [xml]@"
<?xml version="1.0" ?>
<configuration>
  <properties>
    <subtype type="integer">$($vm.Generation - 1)</subtype>
    <name type="string">$($vm.Name)</name>
  </properties>
  <settings>
    <processors>
      <count type="integer">$($vm.ProcessorCount)</count>
    </processors>
    <memory>
      <bank>
        <dynamic_memory_enabled type="bool">$($vm.DynamicMemoryEnabled)</dynamic_memory_enabled>
        <limit type="integer">$($vm.MemoryMaximum / 1MB)</limit>
        <reservation type="integer">$($vm.MemoryMinimum / 1MB)</reservation>
        <size type="integer">$($vm.MemoryStartup / 1MB)</size>
      </bank>
    </memory>
  </settings>
  <AltSwitchName type="string">$($adapter.SwitchName)</AltSwitchName>
  <boot>
    <device0 type="string">Optical</device0>
  </boot>
  <secure_boot_enabled type="bool">False</secure_boot_enabled>
  <notes type="string">$($vm.Notes)</notes>
  <vm-controllers/>
</configuration>
"@
  if ($vm.Generation -eq 1) {
    $controllers = Get-VMIdeController -VM $vm
    $container = $box.SelectSingleNode('/configuration/vm-controllers')
  } else {
    $controllers = Get-VMScsiController -VM $vm
    $container = $box.CreateElement('scsi')
    $container.SetAttribute('ChannelInstanceGuid', 'x')
    if ((Get-VMFirmware -VM $vm).SecureBoot -eq [Microsoft.HyperV.PowerShell.OnOffState]::On) {
      $box.configuration.secure_boot_enabled.'#text' = 'True'
    }
  }
  foreach ($controller in $controllers) {
    $controllerNode = $box.CreateElement('controller' + $controller.ControllerNumber)
    foreach ($drive in $controller.Drives) {
      $driveNode = $box.CreateElement('drive' + ($drive.DiskNumber + 0))
      $pathNode = $box.CreateElement('pathname')
      $pathNode.SetAttribute('type', 'string')
      [void]$pathNode.AppendChild($box.CreateTextNode($drive.Path))
      $typeNode = $box.CreateElement('type')
      $typeNode.SetAttribute('type', 'string')
      $kind = if ($drive -is [Microsoft.HyperV.PowerShell.HardDiskDrive]) { 'VHD' } elseif ($drive -is [Microsoft.HyperV.PowerShell.DvdDrive]) { 'ISO' } else { 'NONE' }
      [void]$typeNode.AppendChild($box.CreateTextNode($kind))
      [void]$driveNode.AppendChild($pathNode)
      [void]$driveNode.AppendChild($typeNode)
      [void]$controllerNode.AppendChild($driveNode)
    }
    [void]$container.AppendChild($controllerNode)
  }
  if ($container.Name -ne 'vm-controllers') {
    [void]$box.SelectSingleNode('/configuration/vm-controllers').AppendChild($container)
  }
  $box.Save([IO.Path]::Combine($path, $vm.Name, 'Virtual Machines', 'box.xml'))
}
"#;

/// Send hex scan codes to the VM keyboard one byte at a time. `wait<n>`
/// flushes what is pending and sleeps n seconds (1 if n is missing).
const TYPE_SCAN_CODES: &str = r#"
$vm = Get-CimInstance -Namespace 'root\virtualization\v2' -ClassName Msvm_ComputerSystem -ErrorAction Ignore -Verbose:$false | Where-Object { $_.ElementName -eq $vmName } | Select-Object -First 1
if ($vm -eq $null) { Write-Error "VirtualMachine($vmName) is not found!"; return }
$keyboard = $vm | Get-CimAssociatedInstance -ResultClassName 'Msvm_Keyboard' -ErrorAction Ignore -Verbose:$false
foreach ($namespace in @('root\virtualization\v2', 'root\virtualization')) {
  if ($keyboard -ne $null) { break }
  $keyboard = Get-CimInstance -Namespace $namespace -ClassName Msvm_Keyboard -ErrorAction Ignore -Verbose:$false | Where-Object { $_.SystemName -eq $vm.Name } | Select-Object -First 1
}
if ($keyboard -eq $null) { Write-Error "VirtualMachine($vmName) keyboard class is not found!"; return }
$pending = @()
foreach ($code in (($scanCodes -split ' ') + 'wait0')) {
  if ($code.StartsWith('wait')) {
    foreach ($byte in $pending) {
      $result = $keyboard | Invoke-CimMethod -MethodName 'TypeScancodes' -Arguments @{ ScanCodes = [byte[]]@($byte) }
      if ($result.ReturnValue -ne 0) { Write-Error "TypeScancodes returned $($result.ReturnValue)"; return }
    }
    $pending = @()
    $seconds = $code.Substring(4)
    if (!$seconds) { $seconds = '1' }
    if ([int]$seconds -gt 0) { Start-Sleep -Seconds ([int]$seconds) }
  } else {
    $pending += [Convert]::ToByte($code, 16)
  }
}
"#;

/// Check a scan code sequence: space-separated hex bytes and `wait`/`waitN`
/// markers. Returns it with single spaces between tokens.
fn normalize_scan_codes(scan_codes: &str) -> Result<String, HvError> {
    let mut tokens = Vec::new();
    for token in scan_codes.split_whitespace() {
        let valid = match token.strip_prefix("wait") {
            Some(seconds) => seconds.chars().all(|c| c.is_ascii_digit()) && seconds.len() <= 5,
            None => u8::from_str_radix(token, 16).is_ok() && !token.starts_with('+'),
        };
        if !valid {
            return Err(HvError::Validation {
                message: format!("invalid scan code '{token}': expected a hex byte or wait<seconds>"),
            });
        }
        tokens.push(token);
    }
    Ok(tokens.join(" "))
}

const TURN_OFF_IF_RUNNING: &str = r#"
$vm = Get-VM -Name $vmName -ErrorAction SilentlyContinue
if ($vm.State -eq [Microsoft.HyperV.PowerShell.VMState]::Running) {
  Stop-VM -Name $vmName -TurnOff -Force -Confirm:$false
}
"#;

impl<E: Executor> HyperV<E> {
    /// Create a VM and return its id.
    pub async fn create_virtual_machine(
        &self,
        vm_name: &str,
        path: &str,
        ram_mb: u64,
        switch_name: &str,
        generation: Generation,
    ) -> Result<String, HvError> {
        let ram_bytes = ram_mb.checked_mul(1024 * 1024).ok_or_else(|| HvError::Validation {
            message: format!("memory size overflows: {ram_mb} MB"),
        })?;
        let script = script(
            r#"
$vm = New-VM -Name $vmName -Path $path -MemoryStartupBytes ([long]$ram) -SwitchName $switchName -Generation ([int]$generation)
$vm.Id.Guid
"#,
            [
                ("vmName", vm_name.to_string()),
                ("path", path.to_string()),
                ("ram", ram_bytes.to_string()),
                ("switchName", switch_name.to_string()),
                ("generation", generation.number().to_string()),
            ],
        )?;
        let id = self.output(script).await?;
        tracing::info!(vm_name, id = %id, "created virtual machine");
        Ok(id)
    }

    /// Turn the VM off if needed, then remove it.
    pub async fn delete_virtual_machine(&self, vm_id: &str) -> Result<(), HvError> {
        let script = script(
            r#"
$vm = Get-VM -Id $vmId
if (($vm.State -ne [Microsoft.HyperV.PowerShell.VMState]::Off) -and ($vm.State -ne [Microsoft.HyperV.PowerShell.VMState]::OffCritical)) {
    Stop-VM -VM $vm -TurnOff -Force -Confirm:$false
}
Remove-VM -VM $vm -Force -Confirm:$false
"#,
            [("vmId", vm_id)],
        )?;
        self.run(script).await
    }

    /// Id of the first VM called `vm_name`, or `None` if there is none.
    pub async fn virtual_machine_id(&self, vm_name: &str) -> Result<Option<String>, HvError> {
        let script = script(
            r#"
$vm = Get-VM -Name $vmName -ErrorAction SilentlyContinue | Select-Object -First 1
if ($vm) { $vm.Id.Guid }
"#,
            [("vmName", vm_name)],
        )?;
        self.output(script).await.map(non_empty)
    }

    /// Start the VM if it is off.
    pub async fn start_virtual_machine(&self, vm_name: &str) -> Result<(), HvError> {
        let script = script(
            r#"
$vm = Get-VM -Name $vmName -ErrorAction SilentlyContinue
if ($vm.State -eq [Microsoft.HyperV.PowerShell.VMState]::Off) {
  Start-VM -Name $vmName -Confirm:$false
}
"#,
            [("vmName", vm_name)],
        )?;
        self.run(script).await
    }

    pub async fn restart_virtual_machine(&self, vm_name: &str) -> Result<(), HvError> {
        let script = script(
            "Restart-VM $vmName -Force -Confirm:$false\n",
            [("vmName", vm_name)],
        )?;
        self.run(script).await
    }

    /// Graceful stop through the guest's shutdown service, if running.
    pub async fn stop_virtual_machine(&self, vm_name: &str) -> Result<(), HvError> {
        self.run(script(STOP_IF_RUNNING, [("vmName", vm_name)])?).await
    }

    pub async fn shut_down(&self, vm_name: &str) -> Result<(), HvError> {
        self.stop_virtual_machine(vm_name).await
    }

    /// Hard power-off, if running.
    pub async fn turn_off(&self, vm_name: &str) -> Result<(), HvError> {
        self.run(script(TURN_OFF_IF_RUNNING, [("vmName", vm_name)])?).await
    }

    pub async fn is_running(&self, vm_name: &str) -> Result<bool, HvError> {
        self.state_is(vm_name, "Running", "is_running").await
    }

    pub async fn is_off(&self, vm_name: &str) -> Result<bool, HvError> {
        self.state_is(vm_name, "Off", "is_off").await
    }

    async fn state_is(&self, vm_name: &str, state: &str, operation: &str) -> Result<bool, HvError> {
        let script = script(
            r#"
$vm = Get-VM -Name $vmName -ErrorAction SilentlyContinue
$vm.State -eq [Microsoft.HyperV.PowerShell.VMState]::$state
"#,
            [("vmName", vm_name), ("state", state)],
        )?;
        let out = self.output(script).await?;
        parse_bool(operation, &out)
    }

    /// Whole seconds since the VM was started.
    pub async fn uptime(&self, vm_name: &str) -> Result<u64, HvError> {
        let script = script(
            r#"
$vm = Get-VM -Name $vmName -ErrorAction SilentlyContinue
[math]::Floor($vm.Uptime.TotalSeconds)
"#,
            [("vmName", vm_name)],
        )?;
        let out = self.output(script).await?;
        parse_number("uptime", &out)
    }

    pub async fn set_cpu_count(&self, vm_id: &str, cpu: u32) -> Result<(), HvError> {
        let script = script(
            r#"
$vm = Get-VM -Id $vmId
Set-VMProcessor -VM $vm -Count ([int]$cpu)
"#,
            [("vmId", vm_id.to_string()), ("cpu", cpu.to_string())],
        )?;
        self.run(script).await
    }

    pub async fn set_dynamic_memory(&self, vm_name: &str, enabled: bool) -> Result<(), HvError> {
        let script = script(
            "Set-VMMemory -VMName $vmName -DynamicMemoryEnabled ([System.Boolean]::Parse($enabled))\n",
            [("vmName", vm_name), ("enabled", ps_bool(enabled))],
        )?;
        self.run(script).await
    }

    /// Expose hardware virtualization to the guest (nested virtualization).
    pub async fn set_virtualization_extensions(
        &self,
        vm_name: &str,
        enabled: bool,
    ) -> Result<(), HvError> {
        let script = script(
            "Set-VMProcessor -VMName $vmName -ExposeVirtualizationExtensions ([System.Boolean]::Parse($enabled))\n",
            [("vmName", vm_name), ("enabled", ps_bool(enabled))],
        )?;
        self.run(script).await
    }

    pub async fn set_mac_spoofing(&self, vm_name: &str, enabled: bool) -> Result<(), HvError> {
        let script = script(
            "Set-VMNetworkAdapter -VMName $vmName -MacAddressSpoofing $state\n",
            [("vmName", vm_name), ("state", on_off(enabled))],
        )?;
        self.run(script).await
    }

    /// Export to `path` and write `box.xml` next to the exported configuration.
    pub async fn export_virtual_machine(&self, vm_name: &str, path: &str) -> Result<(), HvError> {
        self.run(script(EXPORT_VM, [("vmName", vm_name), ("path", path)])?)
            .await?;
        tracing::info!(vm_name, path, "exported virtual machine");
        Ok(())
    }

    /// Fully optimize every `.vhd`/`.vhdx` in `<export_path>/<vhd_dir>`.
    pub async fn compact_disks(&self, export_path: &str, vhd_dir: &str) -> Result<(), HvError> {
        let script = script(
            r#"
Get-ChildItem (Join-Path $exportPath $vhdDir) -Filter *.vhd* | ForEach-Object {
    Optimize-VHD -Path $_.FullName -Mode Full
}
"#,
            [("exportPath", export_path), ("vhdDir", vhd_dir)],
        )?;
        self.run(script).await
    }

    /// Move an export's top-level files, disk directory and VM directory
    /// into `output_path`.
    pub async fn copy_exported_virtual_machine(
        &self,
        export_path: &str,
        output_path: &str,
        vhd_dir: &str,
        vm_dir: &str,
    ) -> Result<(), HvError> {
        let script = script(
            r#"
Move-Item -Path (Join-Path $exportPath '*.*') -Destination $outputPath
Move-Item -Path (Join-Path $exportPath $vhdDir) -Destination $outputPath
Move-Item -Path (Join-Path $exportPath $vmDir) -Destination $outputPath
"#,
            [
                ("exportPath", export_path),
                ("outputPath", output_path),
                ("vhdDir", vhd_dir),
                ("vmDir", vm_dir),
            ],
        )?;
        self.run(script).await
    }

    /// Type `scan_codes` on the VM's keyboard, e.g. `"1c 9c wait5 1c 9c"`.
    /// An empty sequence sends nothing.
    pub async fn type_scan_codes(&self, vm_name: &str, scan_codes: &str) -> Result<(), HvError> {
        let scan_codes = normalize_scan_codes(scan_codes)?;
        if scan_codes.is_empty() {
            return Ok(());
        }
        let script = script(
            TYPE_SCAN_CODES,
            [("vmName", vm_name), ("scanCodes", scan_codes.as_str())],
        )?;
        self.run(script).await
    }

    pub async fn set_secure_boot(&self, vm_name: &str, enabled: bool) -> Result<(), HvError> {
        let script = script(
            "Set-VMFirmware -VMName $vmName -EnableSecureBoot $state\n",
            [("vmName", vm_name), ("state", on_off(enabled))],
        )?;
        self.run(script).await
    }
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "On" } else { "Off" }
}
