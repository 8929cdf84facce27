//! Per-member alarms, persisted in the alarm bucket.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::backend::{Backend, Bucket};
use crate::domain::AlarmMember;
use crate::error::{BackendError, ServerError};
use crate::types::{AlarmType, MemberId};

#[derive(Debug)]
pub struct AlarmStore {
    be: Arc<Backend>,
    active: BTreeMap<AlarmType, BTreeSet<MemberId>>,
}

fn alarm_key(member: MemberId, alarm: AlarmType) -> Vec<u8> {
    let mut key = member.to_be_bytes().to_vec();
    key.extend_from_slice(&(alarm as i32).to_be_bytes());
    key
}

fn decode_alarm_key(key: &[u8]) -> Option<(MemberId, AlarmType)> {
    let member = MemberId::from_be_bytes(key.get(..8)?.try_into().ok()?);
    let tag = i32::from_be_bytes(key.get(8..12)?.try_into().ok()?);
    Some((member, AlarmType::try_from(tag).ok()?))
}

impl AlarmStore {
    /// Creates the alarm bucket if needed and restores active alarms from it.
    pub fn new(be: Arc<Backend>) -> Result<Self, BackendError> {
        let mut active: BTreeMap<AlarmType, BTreeSet<MemberId>> = BTreeMap::new();
        {
            let mut tx = be.batch_tx();
            tx.create_bucket(Bucket::Alarm);
            for (key, _) in tx.scan(Bucket::Alarm)? {
                match decode_alarm_key(&key) {
                    Some((member, alarm)) => {
                        active.entry(alarm).or_default().insert(member);
                    }
                    None => tracing::warn!(?key, "skipping undecodable alarm record"),
                }
            }
        }
        Ok(AlarmStore { be, active })
    }

    /// Raises `alarm` for `member`. Returns `None` when it was already raised.
    pub fn activate(&mut self, member: MemberId, alarm: AlarmType) -> Result<Option<AlarmMember>, ServerError> {
        if alarm == AlarmType::None {
            return Ok(None);
        }
        if !self.active.entry(alarm).or_default().insert(member) {
            return Ok(None);
        }
        self.be.batch_tx().put(Bucket::Alarm, &alarm_key(member, alarm), &[])?;
        tracing::warn!(member, ?alarm, "alarm raised");
        Ok(Some(AlarmMember { member_id: member, alarm }))
    }

    /// Clears `alarm` for `member`. Returns `None` when it was not raised.
    pub fn deactivate(&mut self, member: MemberId, alarm: AlarmType) -> Result<Option<AlarmMember>, ServerError> {
        let removed = self.active.get_mut(&alarm).is_some_and(|members| members.remove(&member));
        if !removed {
            return Ok(None);
        }
        self.be.batch_tx().delete(Bucket::Alarm, &alarm_key(member, alarm))?;
        tracing::info!(member, ?alarm, "alarm cleared");
        Ok(Some(AlarmMember { member_id: member, alarm }))
    }

    /// Active alarms of one type, or of every type for `AlarmType::None`.
    pub fn get(&self, alarm: AlarmType) -> Vec<AlarmMember> {
        self.active
            .iter()
            .filter(|(at, _)| alarm == AlarmType::None || **at == alarm)
            .flat_map(|(at, members)| members.iter().map(move |m| AlarmMember { member_id: *m, alarm: *at }))
            .collect()
    }
}
