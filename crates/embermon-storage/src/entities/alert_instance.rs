use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "alert_instance")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub rule_org_id: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub rule_uid: String,
    /// Hex label-set fingerprint; together with the org and rule UID this
    /// identifies exactly one instance.
    #[sea_orm(primary_key, auto_increment = false)]
    pub labels_hash: String,
    /// Full label set as a JSON object.
    pub labels: String,
    pub current_state: String,
    pub current_reason: Option<String>,
    pub current_state_since: DateTimeWithTimeZone,
    pub current_state_end: DateTimeWithTimeZone,
    pub last_eval_time: DateTimeWithTimeZone,
    pub last_sent_at: Option<DateTimeWithTimeZone>,
    pub resolved_at: Option<DateTimeWithTimeZone>,
    pub result_fingerprint: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
