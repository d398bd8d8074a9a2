use anyhow::Result;
use rusqlite::OptionalExtension;

use crate::Database;
use crate::models::{UserRow, now_millis};

impl Database {
    /// Upsert a profile mirror from the identity provider. Notification
    /// preferences live here because recipient resolution reads them.
    pub fn upsert_user(
        &self,
        id: &str,
        display_name: &str,
        email: Option<&str>,
        notify_first_message: bool,
        notify_offer_activity: bool,
    ) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, display_name, email, notify_first_message, notify_offer_activity, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    display_name = excluded.display_name,
                    email = excluded.email,
                    notify_first_message = excluded.notify_first_message,
                    notify_offer_activity = excluded.notify_offer_activity",
                rusqlite::params![
                    id,
                    display_name,
                    email,
                    notify_first_message,
                    notify_offer_activity,
                    now_millis(),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, display_name, email, notify_first_message, notify_offer_activity, created_at
                 FROM users WHERE id = ?1",
            )?;
            let row = stmt
                .query_row([id], |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        display_name: row.get(1)?,
                        email: row.get(2)?,
                        notify_first_message: row.get(3)?,
                        notify_offer_activity: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }
}
