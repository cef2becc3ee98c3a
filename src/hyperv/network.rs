//! Virtual switches, network adapters and address lookups.
//!
//! Address and MAC lookups answer with an empty string when the VM or
//! adapter has no such attribute; only transport failures are errors.

use super::{HyperV, non_empty, script};
use crate::error::HvError;
use crate::executor::Executor;

impl<E: Executor> HyperV<E> {
    /// Create a switch unless one with this name exists. Returns the new
    /// switch id, or `None` if it already existed.
    pub async fn create_virtual_switch(
        &self,
        switch_name: &str,
        switch_type: &str,
    ) -> Result<Option<String>, HvError> {
        let script = script(
            r#"
$switches = @(Get-VMSwitch -Name $switchName -ErrorAction SilentlyContinue)
if ($switches.Count -eq 0) {
  $sw = New-VMSwitch -Name $switchName -SwitchType $switchType
  $sw.Id.Guid
}
"#,
            [("switchName", switch_name), ("switchType", switch_type)],
        )?;
        self.output(script).await.map(non_empty)
    }

    /// Id of the first switch called `switch_name`, or `None` if there is none.
    pub async fn virtual_switch_id(&self, switch_name: &str) -> Result<Option<String>, HvError> {
        let script = script(
            r#"
$sw = Get-VMSwitch -Name $switchName -ErrorAction SilentlyContinue | Select-Object -First 1
if ($sw) { $sw.Id.Guid }
"#,
            [("switchName", switch_name)],
        )?;
        self.output(script).await.map(non_empty)
    }

    /// Find or create an external switch on the first connected wired, Wi-Fi
    /// or LAN adapter and connect the VM's adapters to it. Fails if the host
    /// has no such adapter.
    pub async fn create_external_virtual_switch(
        &self,
        vm_name: &str,
        switch_name: &str,
    ) -> Result<(), HvError> {
        let script = script(
            r#"
$sw = $null
$adapters = foreach ($adapterName in @('ethernet', 'wi-fi', 'lan')) {
  Get-NetAdapter -Physical -Name $adapterName -ErrorAction SilentlyContinue | Where-Object { $_.Status -eq 'Up' }
}
foreach ($adapter in $adapters) {
  $sw = Get-VMSwitch -SwitchType External | Where-Object { $_.NetAdapterInterfaceDescription -eq $adapter.InterfaceDescription }
  if ($sw -eq $null) {
    $sw = New-VMSwitch -Name $switchName -NetAdapterName $adapter.Name -AllowManagementOS $true -Notes 'Parent OS, VMs, WiFi'
  }
  if ($sw -ne $null) { break }
}
if ($sw -ne $null) {
  Get-VMNetworkAdapter -VMName $vmName | Connect-VMNetworkAdapter -VMSwitch $sw
} else {
  Write-Error 'No internet adapters found'
}
"#,
            [("vmName", vm_name), ("switchName", switch_name)],
        )?;
        self.run(script).await
    }

    pub async fn delete_virtual_switch(&self, switch_id: &str) -> Result<(), HvError> {
        let script = script(
            r#"
$sw = Get-VMSwitch -Id $switchId -ErrorAction SilentlyContinue
if ($sw -ne $null) {
    $sw | Remove-VMSwitch -Force -Confirm:$false
}
"#,
            [("switchId", switch_id)],
        )?;
        self.run(script).await
    }

    /// Add a named adapter on `switch_name`, optionally in access mode on `vlan_id`.
    pub async fn add_network_adapter(
        &self,
        vm_id: &str,
        adapter_name: &str,
        switch_name: &str,
        vlan_id: Option<u16>,
    ) -> Result<(), HvError> {
        let script = script(
            r#"
$vm = Get-VM -Id $vmId
if (!$vm) { Write-Error "Could not get VM: $vmId"; return }
$vm | Add-VMNetworkAdapter -Name $adapterName -SwitchName $switchName
if ($vlanId -ne '') {
    Set-VMNetworkAdapterVlan -VMName $vm.Name -VMNetworkAdapterName $adapterName -Access -VlanId ([int]$vlanId)
}
"#,
            [
                ("vmId", vm_id.to_string()),
                ("adapterName", adapter_name.to_string()),
                ("switchName", switch_name.to_string()),
                ("vlanId", vlan_id.map(|v| v.to_string()).unwrap_or_default()),
            ],
        )?;
        self.run(script).await
    }

    pub async fn connect_network_adapter_to_switch(
        &self,
        vm_name: &str,
        switch_name: &str,
    ) -> Result<(), HvError> {
        let script = script(
            "Get-VMNetworkAdapter -VMName $vmName | Connect-VMNetworkAdapter -SwitchName $switchName\n",
            [("vmName", vm_name), ("switchName", switch_name)],
        )?;
        self.run(script).await
    }

    pub async fn virtual_machine_switch_name(&self, vm_name: &str) -> Result<String, HvError> {
        let script = script(
            "(Get-VMNetworkAdapter -VMName $vmName).SwitchName\n",
            [("vmName", vm_name)],
        )?;
        self.output(script).await
    }

    pub async fn set_virtual_machine_vlan_id(&self, vm_id: &str, vlan_id: u16) -> Result<(), HvError> {
        let script = script(
            r#"
$vm = Get-VM -Id $vmId
Set-VMNetworkAdapterVlan -VMName $vm.Name -Access -VlanId ([int]$vlanId)
"#,
            [("vmId", vm_id.to_string()), ("vlanId", vlan_id.to_string())],
        )?;
        self.run(script).await
    }

    /// Tag the host's management adapter for `adapter_name` with `vlan_id`.
    pub async fn set_management_adapter_vlan_id(
        &self,
        adapter_name: &str,
        vlan_id: u16,
    ) -> Result<(), HvError> {
        let script = script(
            "Set-VMNetworkAdapterVlan -ManagementOS -VMNetworkAdapterName $adapterName -Access -VlanId ([int]$vlanId)\n",
            [
                ("adapterName", adapter_name.to_string()),
                ("vlanId", vlan_id.to_string()),
            ],
        )?;
        self.run(script).await
    }

    /// Clear VLAN tagging on the VM's adapters and on the host adapter of `switch_name`.
    pub async fn untag_network_adapter_vlan(&self, vm_name: &str, switch_name: &str) -> Result<(), HvError> {
        let script = script(
            r#"
Set-VMNetworkAdapterVlan -VMName $vmName -Untagged
Set-VMNetworkAdapterVlan -ManagementOS -VMNetworkAdapterName $switchName -Untagged
"#,
            [("vmName", vm_name), ("switchName", switch_name)],
        )?;
        self.run(script).await
    }

    /// Name of an external switch bound to a connected physical adapter,
    /// fastest adapter first. Empty if there is none.
    pub async fn external_online_virtual_switch(&self) -> Result<String, HvError> {
        let script = script(
            r#"
$adapters = Get-NetAdapter -Physical -ErrorAction SilentlyContinue | Where-Object { $_.Status -eq 'Up' } | Sort-Object -Descending -Property Speed
foreach ($adapter in $adapters) {
  $sw = Get-VMSwitch -SwitchType External | Where-Object { $_.NetAdapterInterfaceDescription -eq $adapter.InterfaceDescription }
  if ($sw -ne $null) {
    $sw.Name
    break
  }
}
"#,
            std::iter::empty::<(&str, &str)>(),
        )?;
        self.output(script).await
    }

    /// IPv4 address of the host's adapter on `switch_name`. Empty if absent.
    pub async fn host_adapter_ip_address_for_switch(&self, switch_name: &str) -> Result<String, HvError> {
        let script = script(
            r#"
$hostVmAdapter = Get-VMNetworkAdapter -ManagementOS -SwitchName $switchName
if ($hostVmAdapter) {
    $hostNetAdapter = Get-NetAdapter | Where-Object { $_.DeviceID -eq $hostVmAdapter.DeviceId }
    if ($hostNetAdapter) {
        $config = @(Get-WmiObject win32_networkadapterconfiguration -Filter "IPEnabled = 'TRUE' AND InterfaceIndex=$($hostNetAdapter.ifIndex)")
        if ($config) {
            return @($config.IpAddress)[0]
        }
    }
}
return ''
"#,
            [("switchName", switch_name)],
        )?;
        self.output(script).await
    }

    /// First IP address Hyper-V reports on the VM's default "Network Adapter".
    /// Empty if absent.
    pub async fn network_adapter_address(&self, vm_name: &str) -> Result<String, HvError> {
        let script = script(
            r#"
try {
  $adapter = Get-VMNetworkAdapter -VMName $vmName -Name 'Network Adapter' -ErrorAction SilentlyContinue
  $ip = $adapter.IPAddresses[[int]$addressIndex]
  if ($ip -eq $null) { return '' }
} catch {
  return ''
}
$ip
"#,
            [("vmName", vm_name), ("addressIndex", "0")],
        )?;
        self.output(script).await
    }

    /// MAC address of the VM's first adapter. Empty if absent.
    pub async fn mac_address(&self, vm_name: &str) -> Result<String, HvError> {
        let script = script(
            r#"
try {
  $adapter = Get-VMNetworkAdapter -VMName $vmName -ErrorAction SilentlyContinue
  $mac = $adapter[[int]$adapterIndex].MacAddress
  if ($mac -eq $null) { return '' }
} catch {
  return ''
}
$mac
"#,
            [("vmName", vm_name), ("adapterIndex", "0")],
        )?;
        self.output(script).await
    }

    /// First IP address of the adapter with `mac`. Empty if absent.
    pub async fn ip_address(&self, mac: &str) -> Result<String, HvError> {
        let script = script(
            r#"
try {
  $ip = Get-VM | ForEach-Object { $_.NetworkAdapters } | Where-Object { $_.MacAddress -eq $mac } | ForEach-Object { $_.IpAddresses[[int]$addressIndex] }
  if ($ip -eq $null) { return '' }
} catch {
  return ''
}
$ip
"#,
            [("mac", mac), ("addressIndex", "0")],
        )?;
        self.output(script).await
    }

    /// Convenience: IP address of the VM's first adapter, via its MAC.
    pub async fn virtual_machine_ip_address(&self, vm_name: &str) -> Result<Option<String>, HvError> {
        let mac = self.mac_address(vm_name).await?;
        if mac.is_empty() {
            return Ok(None);
        }
        self.ip_address(&mac).await.map(non_empty)
    }
}
