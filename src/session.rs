//! Local vs. remote execution targets and the remoting envelope.
//!
//! [`wrap`] is a pure function: it never opens a connection. The generated
//! `Invoke-Command` call is what connects, once the interpreter runs it.

use std::fmt::Write as _;

use crate::script::Script;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Credentials are only meaningful when both parts are set.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Option<Self> {
        let username = username.into();
        let password = password.into();
        if username.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self { username, password })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHost {
    pub computer_name: String,
    pub credentials: Option<Credentials>,
    pub use_ssl: bool,
}

impl RemoteHost {
    pub fn new(computer_name: impl Into<String>) -> Self {
        Self {
            computer_name: computer_name.into(),
            credentials: None,
            use_ssl: false,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_ssl(mut self, use_ssl: bool) -> Self {
        self.use_ssl = use_ssl;
        self
    }
}

/// Where a script runs. There is no implicit default: local execution
/// has to be asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Session {
    Local,
    Remote(RemoteHost),
}

impl Session {
    pub fn remote(host: RemoteHost) -> Self {
        Session::Remote(host)
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Session::Local)
    }

    /// Target name for log fields.
    pub fn target(&self) -> &str {
        match self {
            Session::Local => "localhost",
            Session::Remote(host) => &host.computer_name,
        }
    }
}

const CREDENTIAL_VAR: &str = "$hvCredential";
const PASSWORD_VAR: &str = "$hvSecurePassword";
pub(crate) const SESSION_VAR: &str = "$hvSession";

/// Produce the script that runs `script` in `session`.
///
/// Local sessions get the script back untouched. Remote sessions get an
/// optional credential block followed by one `Invoke-Command` whose script
/// block first rebinds every parameter through `$using:`, then runs the body.
/// Parameters themselves are unchanged: they are still delivered locally
/// through the preamble and cross over via `$using:`.
pub fn wrap(script: &Script, session: &Session) -> Script {
    let host = match session {
        Session::Local => return script.clone(),
        Session::Remote(host) => host,
    };

    let mut body = String::new();
    if let Some(creds) = &host.credentials {
        body.push_str(&credential_block(creds));
    }

    let _ = write!(
        body,
        "Invoke-Command -ComputerName {}",
        quote_literal(&host.computer_name)
    );
    if host.credentials.is_some() {
        let _ = write!(body, " -Credential {CREDENTIAL_VAR}");
    }
    body.push_str(" -ScriptBlock {\n");
    for name in script.params.names() {
        let _ = writeln!(body, "${name} = $using:{name}");
    }
    body.push_str(&script.body);
    if !script.body.ends_with('\n') {
        body.push('\n');
    }
    body.push('}');
    if host.use_ssl {
        body.push_str(" -UseSSL");
    }
    body.push('\n');

    Script {
        body,
        params: script.params.clone(),
    }
}

/// Statements that leave an open `PSSession` to `host` in `$hvSession`,
/// for cmdlets such as `Copy-Item -ToSession` that need one.
pub(crate) fn open_pssession(host: &RemoteHost) -> String {
    let mut out = String::new();
    if let Some(creds) = &host.credentials {
        out.push_str(&credential_block(creds));
    }
    let _ = write!(
        out,
        "{SESSION_VAR} = New-PSSession -ComputerName {}",
        quote_literal(&host.computer_name)
    );
    if host.credentials.is_some() {
        let _ = write!(out, " -Credential {CREDENTIAL_VAR}");
    }
    if host.use_ssl {
        out.push_str(" -UseSSL");
    }
    out.push('\n');
    out
}

fn credential_block(creds: &Credentials) -> String {
    format!(
        "{PASSWORD_VAR} = ConvertTo-SecureString {} -AsPlainText -Force\n\
         {CREDENTIAL_VAR} = New-Object System.Management.Automation.PSCredential ({}, {PASSWORD_VAR})\n",
        quote_literal(&creds.password),
        quote_literal(&creds.username),
    )
}

/// Render `value` as a PowerShell single-quoted string. Inside single quotes
/// only quote characters are special, and doubling them escapes them.
/// PowerShell treats the typographic single quotes as quotes too.
pub fn quote_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}') {
            out.push(c);
        }
        out.push(c);
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterSet;

    fn vm_script() -> Script {
        Script::new("Get-VM -Name $vmName")
            .with_params(ParameterSet::from_pairs([("vmName", "web01")]).unwrap())
    }

    fn host() -> RemoteHost {
        RemoteHost::new("hv01.lab.local")
    }

    #[test]
    fn local_session_is_identity() {
        let script = vm_script();
        assert_eq!(wrap(&script, &Session::Local), script);
    }

    #[test]
    fn remote_with_credentials_has_one_credential_and_one_invoke_block() {
        let session = Session::remote(
            host().with_credentials(Credentials::new("LAB\\admin", "s3cret")),
        );
        let wrapped = wrap(&vm_script(), &session);
        let body = &wrapped.body;

        assert_eq!(body.matches("ConvertTo-SecureString").count(), 1);
        assert_eq!(body.matches("PSCredential").count(), 1);
        assert_eq!(body.matches("Invoke-Command").count(), 1);
        assert!(body.contains("-ComputerName 'hv01.lab.local'"));
        assert!(body.contains("-Credential $hvCredential"));
        assert!(body.contains("ConvertTo-SecureString 's3cret'"));
        assert!(body.contains("PSCredential ('LAB\\admin', $hvSecurePassword)"));
        // credential block precedes the remote call
        assert!(body.find("ConvertTo-SecureString") < body.find("Invoke-Command"));
        assert!(!body.contains("-UseSSL"));
    }

    #[test]
    fn remote_without_credentials_omits_credential_block() {
        let wrapped = wrap(&vm_script(), &Session::remote(host()));
        assert!(!wrapped.body.contains("ConvertTo-SecureString"));
        assert!(!wrapped.body.contains("-Credential"));
        assert_eq!(wrapped.body.matches("Invoke-Command").count(), 1);
        assert!(wrapped.body.starts_with("Invoke-Command -ComputerName 'hv01.lab.local'"));
    }

    #[test]
    fn ssl_flag_appended_to_invoke_command() {
        let wrapped = wrap(&vm_script(), &Session::remote(host().with_ssl(true)));
        assert!(wrapped.body.trim_end().ends_with("} -UseSSL"));
    }

    #[test]
    fn parameters_rebound_through_using_before_body() {
        let wrapped = wrap(&vm_script(), &Session::remote(host()));
        let rebind = wrapped.body.find("$vmName = $using:vmName").unwrap();
        let body = wrapped.body.find("Get-VM -Name $vmName").unwrap();
        assert!(rebind < body);
        assert_eq!(wrapped.params, vm_script().params);
    }

    #[test]
    fn envelope_variables_cannot_be_parameters() {
        for name in ["hvCredential", "hvSecurePassword", "hvSession"] {
            assert!(ParameterSet::from_pairs([(name, "v")]).is_err());
        }
        let session = Session::remote(host().with_credentials(Credentials::new("admin", "pw")));
        let wrapped = wrap(&vm_script(), &session);
        assert_eq!(wrapped.body.matches("$hvCredential =").count(), 1);
        assert!(!wrapped.body.contains("$using:hv"));
    }

    #[test]
    fn pssession_block_carries_credentials_and_ssl() {
        let block = open_pssession(
            &host()
                .with_credentials(Credentials::new("admin", "pw"))
                .with_ssl(true),
        );
        assert!(block.starts_with("$hvSecurePassword = ConvertTo-SecureString 'pw'"));
        assert!(block.contains(
            "$hvSession = New-PSSession -ComputerName 'hv01.lab.local' -Credential $hvCredential -UseSSL\n"
        ));

        let plain = open_pssession(&host());
        assert_eq!(plain, "$hvSession = New-PSSession -ComputerName 'hv01.lab.local'\n");
    }

    #[test]
    fn partial_credentials_are_none() {
        assert!(Credentials::new("admin", "").is_none());
        assert!(Credentials::new("", "pw").is_none());
        assert!(Credentials::new("admin", "pw").is_some());
    }

    #[test]
    fn quote_literal_doubles_quotes() {
        assert_eq!(quote_literal("plain"), "'plain'");
        assert_eq!(quote_literal("it's"), "'it''s'");
        assert_eq!(quote_literal("$(rm -rf)`n"), "'$(rm -rf)`n'");
        assert_eq!(quote_literal("a\u{2019}b"), "'a\u{2019}\u{2019}b'");
    }

    #[test]
    fn hostile_password_stays_inside_literal() {
        let session = Session::remote(
            host().with_credentials(Credentials::new("admin", "pw\"; Remove-Item C:\\ -Recurse; '")),
        );
        let wrapped = wrap(&vm_script(), &session);
        assert!(
            wrapped
                .body
                .contains("ConvertTo-SecureString 'pw\"; Remove-Item C:\\ -Recurse; ''' -AsPlainText")
        );
    }
}
