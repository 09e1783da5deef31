// ==========================================
// 营销活动事件调度 - 活动数据仓储
// ==========================================
// 对齐: campaigns / campaign_events / campaign_members 表
// ==========================================

use crate::db::open_sqlite_connection;
use crate::domain::campaign::{Campaign, CampaignEvent, CampaignMember};
use crate::domain::types::EventType;
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// CampaignRepository - 活动仓储
// ==========================================
pub struct CampaignRepository {
    conn: Arc<Mutex<Connection>>,
}

impl CampaignRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn from_path(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 活动
    // ==========================================

    pub fn insert_campaign(&self, campaign: &Campaign) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO campaigns (id, name, description, is_published, created_by)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                campaign.id,
                campaign.name,
                campaign.description,
                campaign.is_published,
                campaign.created_by,
            ],
        )?;
        Ok(())
    }

    pub fn find_campaign(&self, campaign_id: i64) -> RepositoryResult<Option<Campaign>> {
        let conn = self.get_conn()?;
        let campaign = conn
            .query_row(
                "SELECT id, name, description, is_published, created_by FROM campaigns WHERE id = ?1",
                params![campaign_id],
                |row| {
                    Ok(Campaign {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        is_published: row.get(3)?,
                        created_by: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(campaign)
    }

    /// 发布 / 下线活动
    pub fn set_published(&self, campaign_id: i64, published: bool) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE campaigns SET is_published = ?1 WHERE id = ?2",
            params![published, campaign_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::not_found("Campaign", campaign_id));
        }
        Ok(())
    }

    // ==========================================
    // 活动事件
    // ==========================================

    pub fn insert_event(&self, event: &CampaignEvent) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO campaign_events (
                id, campaign_id, name, description, event_type, type_key, channel, channel_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                event.id,
                event.campaign_id,
                event.name,
                event.description,
                event.event_type.as_str(),
                event.type_key,
                event.channel,
                event.channel_id,
            ],
        )?;
        Ok(())
    }

    pub fn find_event(&self, event_id: i64) -> RepositoryResult<Option<CampaignEvent>> {
        let conn = self.get_conn()?;
        let event = conn
            .query_row(
                r#"
                SELECT id, campaign_id, name, description, event_type, type_key, channel, channel_id
                FROM campaign_events WHERE id = ?1
                "#,
                params![event_id],
                map_event_row,
            )
            .optional()?;
        Ok(event)
    }

    /// 活动下的全部事件（id 升序）
    pub fn find_events_by_campaign(&self, campaign_id: i64) -> RepositoryResult<Vec<CampaignEvent>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, campaign_id, name, description, event_type, type_key, channel, channel_id
            FROM campaign_events WHERE campaign_id = ?1
            ORDER BY id ASC
            "#,
        )?;
        let events = stmt
            .query_map(params![campaign_id], map_event_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    // ==========================================
    // 活动成员
    // ==========================================

    /// 新增或覆盖成员（轮次 / 移除标记）
    pub fn upsert_member(&self, member: &CampaignMember) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO campaign_members (campaign_id, contact_id, rotation, manually_removed)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(campaign_id, contact_id) DO UPDATE SET
                rotation = excluded.rotation,
                manually_removed = excluded.manually_removed
            "#,
            params![
                member.campaign_id,
                member.contact_id,
                member.rotation,
                member.manually_removed,
            ],
        )?;
        Ok(())
    }

    pub fn find_member(
        &self,
        campaign_id: i64,
        contact_id: i64,
    ) -> RepositoryResult<Option<CampaignMember>> {
        let conn = self.get_conn()?;
        let member = conn
            .query_row(
                r#"
                SELECT campaign_id, contact_id, rotation, manually_removed
                FROM campaign_members WHERE campaign_id = ?1 AND contact_id = ?2
                "#,
                params![campaign_id, contact_id],
                |row| {
                    Ok(CampaignMember {
                        campaign_id: row.get(0)?,
                        contact_id: row.get(1)?,
                        rotation: row.get(2)?,
                        manually_removed: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(member)
    }

    /// 手动移除成员（保留轮次）
    pub fn remove_member(&self, campaign_id: i64, contact_id: i64) -> RepositoryResult<CampaignMember> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            "UPDATE campaign_members SET manually_removed = 1 WHERE campaign_id = ?1 AND contact_id = ?2",
            params![campaign_id, contact_id],
        )?;
        drop(conn);
        if rows == 0 {
            return Err(RepositoryError::not_found(
                "CampaignMember",
                format!("{}/{}", campaign_id, contact_id),
            ));
        }
        self.find_member(campaign_id, contact_id)?.ok_or_else(|| {
            RepositoryError::not_found("CampaignMember", format!("{}/{}", campaign_id, contact_id))
        })
    }

    /// 成员进入下一轮次（重新加入活动），返回新轮次
    pub fn start_next_rotation(&self, campaign_id: i64, contact_id: i64) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let rotation: Option<i64> = conn
            .query_row(
                r#"
                UPDATE campaign_members
                SET rotation = rotation + 1, manually_removed = 0
                WHERE campaign_id = ?1 AND contact_id = ?2
                RETURNING rotation
                "#,
                params![campaign_id, contact_id],
                |row| row.get(0),
            )
            .optional()?;
        rotation.ok_or_else(|| {
            RepositoryError::not_found("CampaignMember", format!("{}/{}", campaign_id, contact_id))
        })
    }
}

fn map_event_row(row: &Row) -> rusqlite::Result<CampaignEvent> {
    let event_type_str: String = row.get(4)?;
    let event_type = event_type_str.parse::<EventType>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(CampaignEvent {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        event_type,
        type_key: row.get(5)?,
        channel: row.get(6)?,
        channel_id: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory_with_schema;

    fn setup_repo() -> CampaignRepository {
        let conn = open_in_memory_with_schema().unwrap();
        CampaignRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn make_campaign(id: i64, published: bool) -> Campaign {
        Campaign {
            id,
            name: format!("Campaign {}", id),
            description: None,
            is_published: published,
            created_by: Some(1),
        }
    }

    #[test]
    fn test_insert_and_publish_campaign() {
        let repo = setup_repo();
        repo.insert_campaign(&make_campaign(1, false)).unwrap();

        assert!(!repo.find_campaign(1).unwrap().unwrap().is_published);
        repo.set_published(1, true).unwrap();
        assert!(repo.find_campaign(1).unwrap().unwrap().is_published);
    }

    #[test]
    fn test_set_published_unknown_campaign() {
        let repo = setup_repo();
        let err = repo.set_published(99, true).unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }

    #[test]
    fn test_event_round_trip() {
        let repo = setup_repo();
        repo.insert_campaign(&make_campaign(1, true)).unwrap();
        let event = CampaignEvent {
            id: 10,
            campaign_id: 1,
            name: "Send welcome".to_string(),
            description: Some("welcome email".to_string()),
            event_type: EventType::Action,
            type_key: "email.send".to_string(),
            channel: Some("email".to_string()),
            channel_id: Some(4),
        };
        repo.insert_event(&event).unwrap();

        assert_eq!(repo.find_event(10).unwrap(), Some(event));
        assert_eq!(repo.find_event(11).unwrap(), None);
        assert_eq!(repo.find_events_by_campaign(1).unwrap().len(), 1);
    }

    #[test]
    fn test_member_rotation_and_removal() {
        let repo = setup_repo();
        repo.insert_campaign(&make_campaign(2, true)).unwrap();
        repo.upsert_member(&CampaignMember {
            campaign_id: 2,
            contact_id: 7,
            rotation: 1,
            manually_removed: false,
        })
        .unwrap();

        let removed = repo.remove_member(2, 7).unwrap();
        assert!(removed.manually_removed);
        assert_eq!(removed.rotation, 1);

        let next = repo.start_next_rotation(2, 7).unwrap();
        assert_eq!(next, 2);
        let member = repo.find_member(2, 7).unwrap().unwrap();
        assert!(!member.manually_removed);

        assert!(repo.remove_member(2, 8).is_err());
        assert!(repo.start_next_rotation(2, 8).is_err());
    }
}
