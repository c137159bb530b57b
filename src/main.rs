use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use tgoutbox_lib::oplog::{ItemReference, ReferenceOrigin, SAVED_ITEMS_TAG};
use tgoutbox_lib::paths::Paths;
use tgoutbox_lib::state::AppState;

#[derive(Parser)]
#[command(name = "tgoutbox", version, about = "Синхронизация избранного через журнал операций")]
struct Cli {
  #[arg(long, env = "TGOUTBOX_BASE_DIR", help = "Каталог для data/ и logs/")]
  base_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command
}

#[derive(Subcommand)]
enum Command {
  #[command(about = "Отправлять очередь на сервер до Ctrl+C")]
  Run,
  #[command(about = "Добавить элемент в избранное и поставить в очередь")]
  Save {
    item_id: i64,
    access_hash: i64,
    #[arg(long, help = "Токен ссылки в hex")]
    token: Option<String>
  },
  #[command(about = "Убрать элемент из избранного и поставить удаление в очередь")]
  Unsave {
    item_id: i64,
    access_hash: i64
  },
  #[command(about = "Поставить в очередь полную синхронизацию")]
  Resync,
  #[command(about = "Показать очередь и локальный список")]
  Status
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let _ = dotenvy::dotenv();
  let cli = Cli::parse();

  let paths = Paths::resolve(cli.base_dir)?;

  let _guard = match cli.command {
    Command::Run => {
      paths.ensure_dirs()?;
      Some(tgoutbox_lib::logging::init(&paths.logs_dir))
    }
    _ => {
      tgoutbox_lib::logging::init_stderr();
      None
    }
  };

  let state = AppState::init(paths).await?;

  match cli.command {
    Command::Run => {
      let mut managed = state.start_sync();
      tokio::signal::ctrl_c().await.context("Не удалось дождаться сигнала завершения")?;
      tracing::info!(event = "shutdown_requested", in_flight = managed.in_flight(), "Получен сигнал завершения");
      managed.shutdown();
    }
    Command::Save { item_id, access_hash, token } => {
      let token = token
        .map(|t| hex::decode(t.trim()))
        .transpose()
        .context("Токен должен быть в hex")?;
      let reference = ItemReference { origin: ReferenceOrigin::SavedItems, token };
      state.saved.save_item(item_id, access_hash, Some(reference)).await?;
    }
    Command::Unsave { item_id, access_hash } => {
      state.saved.unsave_item(item_id, access_hash).await?;
    }
    Command::Resync => {
      state.saved.request_resync().await?;
    }
    Command::Status => {
      let pending = state.log.pending_count(SAVED_ITEMS_TAG).await?;
      let items = state.saved.list().await?;
      let synced_at = state.saved.last_synced_at().await?;
      let report = serde_json::json!({
        "pending_operations": pending,
        "saved_items": items,
        "last_synced_at": synced_at,
        "settings": state.settings
      });
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
  }

  Ok(())
}
