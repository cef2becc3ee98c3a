//! Queries about the machine this process runs on. These always use
//! [`Session::Local`], whatever session a [`HyperV`](super::HyperV) holds.

use super::{parse_bool, parse_number, script};
use crate::error::HvError;
use crate::executor::Executor;
use crate::script::Script;
use crate::session::Session;

async fn local_output<E: Executor>(executor: &E, script: Script) -> Result<String, HvError> {
    executor.output_in(&script, &Session::Local).await
}

/// Free physical memory in megabytes.
pub async fn host_available_memory_mb<E: Executor>(executor: &E) -> Result<f64, HvError> {
    let out = local_output(
        executor,
        Script::new("(Get-Counter -Counter '\\Memory\\Available MBytes').CounterSamples[0].CookedValue\n"),
    )
    .await?;
    parse_number("host_available_memory_mb", &out)
}

/// Resolve `ip` to a host name through DNS.
pub async fn host_name<E: Executor>(executor: &E, ip: &str) -> Result<String, HvError> {
    let script = script(
        "[System.Net.Dns]::GetHostEntry($ip).HostName\n",
        [("ip", ip)],
    )?;
    local_output(executor, script).await
}

pub async fn is_current_user_administrator<E: Executor>(executor: &E) -> Result<bool, HvError> {
    let out = local_output(
        executor,
        Script::new(
            r#"
$identity = [System.Security.Principal.WindowsIdentity]::GetCurrent()
$principal = New-Object System.Security.Principal.WindowsPrincipal($identity)
$principal.IsInRole([System.Security.Principal.WindowsBuiltInRole]::Administrator)
"#,
        ),
    )
    .await?;
    parse_bool("is_current_user_administrator", &out)
}

/// Whether `name` is an available PowerShell module.
pub async fn module_exists<E: Executor>(executor: &E, name: &str) -> Result<bool, HvError> {
    let script = script(
        r#"
if (Get-Module -ListAvailable -Name $moduleName) { $true } else { $false }
"#,
        [("moduleName", name)],
    )?;
    let out = local_output(executor, script).await?;
    parse_bool("module_exists", &out)
}

/// Whether the host CPU has virtualization extensions enabled in firmware.
pub async fn has_virtualization_extensions<E: Executor>(executor: &E) -> Result<bool, HvError> {
    let out = local_output(
        executor,
        Script::new("(Get-CimInstance Win32_Processor | Select-Object -First 1).VirtualizationFirmwareEnabled\n"),
    )
    .await?;
    parse_bool("has_virtualization_extensions", &out)
}

/// Replace `<ProductKey>...</ProductKey>` in an unattend file, or drop the
/// element when `product_key` is empty.
pub async fn set_unattended_product_key<E: Executor>(
    executor: &E,
    path: &str,
    product_key: &str,
) -> Result<(), HvError> {
    let script = script(
        r#"
$unattend = [xml](Get-Content -Path $path)
$ns = @{ u = 'urn:schemas-microsoft-com:unattend' }
$setup = $unattend | Select-Xml -Namespace $ns -XPath "//u:settings[@pass='specialize']/u:component[@name='Microsoft-Windows-Shell-Setup']"
if ($setup -eq $null) { Write-Error "No Microsoft-Windows-Shell-Setup component in $path"; return }
$node = $setup.Node
$keyNode = $node.Item('ProductKey')
if ($productKey -eq '') {
    if ($keyNode -ne $null) { [void]$node.RemoveChild($keyNode) }
} else {
    if ($keyNode -eq $null) {
        $keyNode = $unattend.CreateElement('ProductKey', $node.NamespaceURI)
        [void]$node.AppendChild($keyNode)
    }
    $keyNode.InnerText = $productKey
}
$unattend.Save($path)
"#,
        [("path", path), ("productKey", product_key)],
    )?;
    executor.run_in(&script, &Session::Local).await
}
