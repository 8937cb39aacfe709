use async_trait::async_trait;
use chrono::Utc;
use embermon_common::types::RuleKey;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, EntityTrait, Order, QueryFilter, QueryOrder, QuerySelect,
    TransactionTrait,
};

use crate::entities::alert_instance::{self, Column, Entity};
use crate::error::Result;
use crate::store::StateStore;
use crate::{AlertInstanceRow, InstanceQuery, InstanceReader, InstanceStore};

fn to_row(m: alert_instance::Model) -> Result<AlertInstanceRow> {
    Ok(AlertInstanceRow {
        rule_org_id: m.rule_org_id,
        rule_uid: m.rule_uid,
        labels: serde_json::from_str(&m.labels)?,
        labels_hash: m.labels_hash,
        current_state: m.current_state,
        current_reason: m.current_reason,
        current_state_since: m.current_state_since.with_timezone(&Utc),
        current_state_end: m.current_state_end.with_timezone(&Utc),
        last_eval_time: m.last_eval_time.with_timezone(&Utc),
        last_sent_at: m.last_sent_at.map(|t| t.with_timezone(&Utc)),
        resolved_at: m.resolved_at.map(|t| t.with_timezone(&Utc)),
        result_fingerprint: m.result_fingerprint,
    })
}

fn to_model(row: &AlertInstanceRow) -> Result<alert_instance::ActiveModel> {
    Ok(alert_instance::ActiveModel {
        rule_org_id: Set(row.rule_org_id),
        rule_uid: Set(row.rule_uid.clone()),
        labels: Set(serde_json::to_string(&row.labels)?),
        labels_hash: Set(row.labels_hash.clone()),
        current_state: Set(row.current_state.clone()),
        current_reason: Set(row.current_reason.clone()),
        current_state_since: Set(row.current_state_since.fixed_offset()),
        current_state_end: Set(row.current_state_end.fixed_offset()),
        last_eval_time: Set(row.last_eval_time.fixed_offset()),
        last_sent_at: Set(row.last_sent_at.map(|t| t.fixed_offset())),
        resolved_at: Set(row.resolved_at.map(|t| t.fixed_offset())),
        result_fingerprint: Set(row.result_fingerprint.clone()),
    })
}

/// Decode models to rows, logging and skipping rows whose labels column
/// no longer parses instead of failing the whole listing.
fn to_rows(models: Vec<alert_instance::Model>) -> Vec<AlertInstanceRow> {
    let mut rows = Vec::with_capacity(models.len());
    for m in models {
        let org = m.rule_org_id;
        let uid = m.rule_uid.clone();
        match to_row(m) {
            Ok(row) => rows.push(row),
            Err(e) => {
                tracing::warn!(org_id = org, rule_uid = %uid, error = %e,
                    "Skipping undecodable alert instance row");
            }
        }
    }
    rows
}

#[async_trait]
impl InstanceReader for StateStore {
    async fn list_instances(&self, query: &InstanceQuery) -> Result<Vec<AlertInstanceRow>> {
        let mut q = Entity::find().filter(Column::RuleOrgId.eq(query.rule_org_id));
        if let Some(uid) = &query.rule_uid {
            q = q.filter(Column::RuleUid.eq(uid.as_str()));
        }
        let models = q
            .order_by(Column::RuleUid, Order::Asc)
            .order_by(Column::LabelsHash, Order::Asc)
            .all(self.db())
            .await?;
        Ok(to_rows(models))
    }

    async fn list_org_ids_with_instances(&self) -> Result<Vec<i64>> {
        let org_ids: Vec<i64> = Entity::find()
            .select_only()
            .column(Column::RuleOrgId)
            .distinct()
            .order_by(Column::RuleOrgId, Order::Asc)
            .into_tuple()
            .all(self.db())
            .await?;
        Ok(org_ids)
    }
}

#[async_trait]
impl InstanceStore for StateStore {
    async fn upsert_instance(&self, row: AlertInstanceRow) -> Result<()> {
        let am = to_model(&row)?;
        Entity::insert(am)
            .on_conflict(
                OnConflict::columns([Column::RuleOrgId, Column::RuleUid, Column::LabelsHash])
                    .update_columns([
                        Column::Labels,
                        Column::CurrentState,
                        Column::CurrentReason,
                        Column::CurrentStateSince,
                        Column::CurrentStateEnd,
                        Column::LastEvalTime,
                        Column::LastSentAt,
                        Column::ResolvedAt,
                        Column::ResultFingerprint,
                    ])
                    .to_owned(),
            )
            .exec(self.db())
            .await?;
        Ok(())
    }

    async fn delete_instances(&self, key: &RuleKey, labels_hashes: &[String]) -> Result<u64> {
        if labels_hashes.is_empty() {
            return Ok(0);
        }
        let res = Entity::delete_many()
            .filter(Column::RuleOrgId.eq(key.org_id))
            .filter(Column::RuleUid.eq(key.uid.as_str()))
            .filter(Column::LabelsHash.is_in(labels_hashes.iter().map(String::as_str)))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }

    async fn delete_rule_instances(&self, key: &RuleKey) -> Result<u64> {
        let res = Entity::delete_many()
            .filter(Column::RuleOrgId.eq(key.org_id))
            .filter(Column::RuleUid.eq(key.uid.as_str()))
            .exec(self.db())
            .await?;
        Ok(res.rows_affected)
    }

    async fn replace_all_instances(&self, rows: Vec<AlertInstanceRow>) -> Result<()> {
        let models = rows
            .iter()
            .map(to_model)
            .collect::<Result<Vec<_>>>()?;
        let txn = self.db().begin().await?;
        Entity::delete_many().exec(&txn).await?;
        if !models.is_empty() {
            Entity::insert_many(models).exec(&txn).await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn replace_rule_instances(
        &self,
        key: &RuleKey,
        rows: Vec<AlertInstanceRow>,
    ) -> Result<()> {
        let models = rows
            .iter()
            .map(to_model)
            .collect::<Result<Vec<_>>>()?;
        let txn = self.db().begin().await?;
        Entity::delete_many()
            .filter(Column::RuleOrgId.eq(key.org_id))
            .filter(Column::RuleUid.eq(key.uid.as_str()))
            .exec(&txn)
            .await?;
        if !models.is_empty() {
            Entity::insert_many(models).exec(&txn).await?;
        }
        txn.commit().await?;
        Ok(())
    }

    async fn list_rule_uids_with_instances(&self, org_id: i64) -> Result<Vec<String>> {
        let uids: Vec<String> = Entity::find()
            .select_only()
            .column(Column::RuleUid)
            .filter(Column::RuleOrgId.eq(org_id))
            .distinct()
            .order_by(Column::RuleUid, Order::Asc)
            .into_tuple()
            .all(self.db())
            .await?;
        Ok(uids)
    }
}
