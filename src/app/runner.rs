use std::time::Duration;

use crate::oplog::{ItemReference, LogError, MergedEntry, OperationPayload};
use crate::remote::{InputItem, RemoteError, RemoteService};

use super::SyncContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
  MissingReference,
  Remote(String),
  Revalidation(String),
  Resync(String),
  Log(String)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
  Skipped,
  Completed,
  Failed(FailureReason),
  // Запись не удалось удалить из журнала, её надо прогнать заново.
  Retained(String)
}

const REMOVE_ATTEMPTS: u32 = 3;
const REMOVE_BACKOFF: Duration = Duration::from_millis(50);

// Ошибки сервера не выходят наружу: запись удаляется при любом исходе.
pub async fn run_entry(ctx: &SyncContext, entry: &MergedEntry) -> RunOutcome {
  let taken = ctx.log.take_entry(entry.peer_id, entry.tag, entry.tag_local_index).await;
  let outcome = match taken {
    Ok(Some(MergedEntry { payload: Some(payload), .. })) => perform(ctx, payload).await,
    Ok(_) => RunOutcome::Skipped,
    Err(e) => RunOutcome::Failed(FailureReason::Log(e.to_string()))
  };

  match &outcome {
    RunOutcome::Failed(reason) => tracing::warn!(
      event = "saved_items_operation_failed",
      merged_index = entry.merged_index,
      reason = ?reason,
      "Операция избранного не выполнена, запись удаляется"
    ),
    _ => tracing::debug!(
      event = "saved_items_operation_done",
      merged_index = entry.merged_index,
      outcome = ?outcome,
      "Операция избранного обработана"
    )
  }

  match remove_settled(ctx, entry).await {
    Ok(()) => outcome,
    Err(e) => {
      tracing::error!(
        event = "oplog_remove_failed",
        peer_id = entry.peer_id.0,
        tag_local_index = entry.tag_local_index,
        error = %e,
        "Не удалось удалить выполненную операцию из журнала"
      );
      RunOutcome::Retained(e.to_string())
    }
  }
}

async fn remove_settled(ctx: &SyncContext, entry: &MergedEntry) -> Result<(), LogError> {
  let mut attempt = 1;
  loop {
    match ctx.log.remove_entry(entry.peer_id, entry.tag, entry.tag_local_index).await {
      Ok(_) => return Ok(()),
      Err(e) if attempt < REMOVE_ATTEMPTS => {
        tracing::warn!(
          event = "oplog_remove_retry",
          merged_index = entry.merged_index,
          attempt,
          error = %e,
          "Удаление операции не удалось, повторяю"
        );
        tokio::time::sleep(REMOVE_BACKOFF * attempt).await;
        attempt += 1;
      }
      Err(e) => return Err(e)
    }
  }
}

async fn perform(ctx: &SyncContext, payload: OperationPayload) -> RunOutcome {
  match payload {
    OperationPayload::Add { item_id, access_hash, reference } => {
      let Some(reference) = reference else {
        return RunOutcome::Failed(FailureReason::MissingReference);
      };
      match save_with_revalidation(ctx.remote.as_ref(), item_id, access_hash, &reference).await {
        Ok(()) => RunOutcome::Completed,
        Err(reason) => RunOutcome::Failed(reason)
      }
    }
    OperationPayload::Remove { item_id, access_hash } => {
      let item = InputItem { id: item_id, access_hash, token: Vec::new() };
      match ctx.remote.fave_item(item, true).await {
        Ok(_) => RunOutcome::Completed,
        Err(e) => RunOutcome::Failed(FailureReason::Remote(e.to_string()))
      }
    }
    OperationPayload::Sync => match ctx.saved.resync(ctx.remote.as_ref()).await {
      Ok(_) => RunOutcome::Completed,
      Err(e) => RunOutcome::Failed(FailureReason::Resync(format!("{e:#}")))
    }
  }
}

async fn fave(remote: &dyn RemoteService, item_id: i64, access_hash: i64, token: Vec<u8>) -> Result<(), RemoteError> {
  remote.fave_item(InputItem { id: item_id, access_hash, token }, false).await.map(|_| ())
}

// Не больше одной перепроверки ссылки и одного повтора.
pub(crate) async fn save_with_revalidation(
  remote: &dyn RemoteService,
  item_id: i64,
  access_hash: i64,
  reference: &ItemReference
) -> Result<(), FailureReason> {
  let first = match &reference.token {
    Some(token) => fave(remote, item_id, access_hash, token.clone()).await,
    None => Err(RemoteError::rpc(400, "FILE_REFERENCE_EMPTY"))
  };

  let err = match first {
    Ok(()) => return Ok(()),
    Err(e) => e
  };
  if !err.is_reference_invalid() {
    return Err(FailureReason::Remote(err.to_string()));
  }

  tracing::debug!(event = "saved_item_revalidate", item_id, error = %err, "Ссылка устарела, запрашиваю новую");
  let fresh = remote
    .revalidate_reference(item_id, &reference.origin)
    .await
    .map_err(|e| FailureReason::Revalidation(e.to_string()))?;

  fave(remote, item_id, access_hash, fresh)
    .await
    .map_err(|e| FailureReason::Remote(e.to_string()))
}
