use crate::error::HvError;
use crate::runner::Runner;
use crate::script::Script;
use crate::session::Session;

/// Something that can run a script in a session and hand back its output.
#[allow(async_fn_in_trait)] // futures are awaited in place, no Send bound needed
pub trait Executor {
    async fn output_in(&self, script: &Script, session: &Session) -> Result<String, HvError>;

    async fn run_in(&self, script: &Script, session: &Session) -> Result<(), HvError> {
        self.output_in(script, session).await.map(|_| ())
    }
}

impl Executor for Runner {
    async fn output_in(&self, script: &Script, session: &Session) -> Result<String, HvError> {
        self.output_remote(script, session).await
    }
}
