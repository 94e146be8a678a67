pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod filter;
pub mod ids;
pub mod inventory;
pub mod layout;
pub mod page;
pub mod render;
pub mod share;
pub mod storage;
pub mod store;
pub mod view;

use std::ffi::OsString;

use anyhow::Context;
use clap::Parser;
use tracing::{
  debug,
  info
};

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
    "starting cloudboard CLI"
  );
  debug!(?pre.rc_overrides, "preprocessed rc overrides");

  let mut cfg = config::Config::load(
    cli.rc_file.as_deref()
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

  let backend =
    storage::FileBackend::open(
      &data_dir
    )
    .with_context(|| {
      format!(
        "failed to open storage at {}",
        data_dir.display()
      )
    })?;
  let storage =
    storage::Storage::new(backend);

  let grid = cfg.grid_settings()?;
  let ids = cfg.id_strategy()?.build();
  let mut pages = store::PageStore::open(
    storage.clone(),
    ids,
    grid
  )
  .context("failed to load custom pages")?;
  let mut layouts =
    layout::LayoutStore::new(storage);

  let renderer =
    render::Renderer::new(&cfg)?;
  let inv =
    cli::Invocation::parse(cli.rest)?;

  commands::dispatch(
    &mut pages,
    &mut layouts,
    &renderer,
    inv
  )?;

  info!("done");
  Ok(())
}
