pub mod api;
pub mod cli;
pub mod commands;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod identity;
pub mod model;
pub mod render;
pub mod session;
pub mod shell;

use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

use crate::config::{
  AuthProviderKind,
  Config
};
use crate::dashboard::Prompter;
use crate::session::IdentityProvider;

#[tracing::instrument(skip_all)]
pub fn run(
  raw_args: Vec<OsString>
) -> anyhow::Result<()> {
  let pre =
    cli::preprocess_args(&raw_args)?;
  let cli = cli::GlobalCli::parse_from(
    pre.cleaned_args
  );

  cli::init_tracing(
    cli.verbose,
    cli.quiet
  )?;

  info!(
    verbose = cli.verbose,
    quiet = cli.quiet,
    "starting lyst"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = Config::load(
    cli.lystrc.as_deref()
  )?;
  cfg.apply_overrides(
    pre.rc_overrides.into_iter().chain(
      cli
        .rc_overrides
        .into_iter()
        .map(|kv| (kv.key, kv.value))
    )
  );

  let data_dir =
    config::resolve_data_dir(
      &cfg,
      cli.data.as_deref()
    )
    .context(
      "failed to resolve data \
       directory"
    )?;

  let command = cli
    .command
    .unwrap_or(cli::Command::Shell);

  let runtime =
    tokio::runtime::Builder::new_current_thread()
      .enable_all()
      .build()
      .context(
        "failed to start async runtime"
      )?;

  runtime.block_on(run_command(
    &cfg, &data_dir, command
  ))?;

  info!("done");
  Ok(())
}

async fn run_command(
  cfg: &Config,
  data_dir: &Path,
  command: cli::Command
) -> anyhow::Result<()> {
  let provider =
    build_provider(cfg, data_dir)?;
  let session =
    session::SessionTracker::new(
      provider
    );
  let client = api::RemoteClient::new(
    cfg.api_url()?,
    session.clone()
  );

  let prompter: Box<dyn Prompter> =
    match command {
      | cli::Command::Delete {
        yes: true,
        ..
      } => Box::new(shell::AssumeYes),
      | _ => {
        Box::new(shell::TerminalPrompter)
      }
    };

  // Subscribe before restoring so the
  // restored session reaches the
  // dashboard.
  let mut dashboard =
    dashboard::Dashboard::new(
      session.clone(),
      client,
      prompter
    );
  if let Err(err) =
    session.start().await
  {
    tracing::warn!(error = %err, "could not restore session");
  }
  dashboard
    .pump_session_events()
    .await;

  let renderer =
    render::Renderer::new(cfg);

  if command == cli::Command::Shell {
    let mut shell = shell::Shell::new(
      &mut dashboard,
      renderer,
      std::io::stdout()
    );
    return shell
      .run(&mut shell::StdinSource)
      .await;
  }

  let result = commands::dispatch(
    &mut dashboard,
    &renderer,
    command
  )
  .await;
  dashboard.teardown();
  result
}

fn build_provider(
  cfg: &Config,
  data_dir: &Path
) -> anyhow::Result<
  Arc<dyn IdentityProvider>
> {
  let provider: Arc<
    dyn IdentityProvider
  > = match cfg.auth_provider()? {
    | AuthProviderKind::Firebase => {
      Arc::new(
        identity::FirebaseGoogleProvider::new(
          identity::FirebaseSettings::from_config(cfg),
          data_dir,
          Box::new(
            shell::TerminalAuthorization
          )
        )
      )
    }
    | AuthProviderKind::Token => {
      Arc::new(
        identity::StaticTokenProvider::from_config(cfg)
      )
    }
  };
  Ok(provider)
}
