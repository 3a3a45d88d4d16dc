//! Persistent tag index over the `cache_tags` table.

use super::connection::CacheDb;
use super::store::TagIndex;
use crate::Error;
use async_trait::async_trait;
use tokio_rusqlite::params;

#[async_trait]
impl TagIndex for CacheDb {
    async fn register(&self, key: &str, tags: &[String]) -> Result<(), Error> {
        let key = key.to_string();
        let tags = tags.to_vec();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM cache_tags WHERE key = ?1", params![key])?;
                {
                    let mut stmt = tx.prepare("INSERT OR IGNORE INTO cache_tags (tag, key) VALUES (?1, ?2)")?;
                    for tag in &tags {
                        stmt.execute(params![tag, key])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn deregister(&self, key: &str) -> Result<(), Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute("DELETE FROM cache_tags WHERE key = ?1", params![key])?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    async fn keys_for_tag(&self, tag: &str) -> Result<Vec<String>, Error> {
        let tag = tag.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT key FROM cache_tags WHERE tag = ?1 ORDER BY key")?;
                let keys = stmt
                    .query_map(params![tag], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(keys)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_register_and_lookup() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.register("k1", &["dashboard".into()]).await.unwrap();
        db.register("k2", &["dashboard".into(), "deals".into()]).await.unwrap();

        assert_eq!(db.keys_for_tag("dashboard").await.unwrap(), vec!["k1".to_string(), "k2".to_string()]);
        assert_eq!(db.keys_for_tag("deals").await.unwrap(), vec!["k2".to_string()]);
    }

    #[tokio::test]
    async fn test_register_replaces() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.register("k", &["old".into()]).await.unwrap();
        db.register("k", &["new".into()]).await.unwrap();

        assert!(db.keys_for_tag("old").await.unwrap().is_empty());
        assert_eq!(db.keys_for_tag("new").await.unwrap(), vec!["k".to_string()]);
    }

    #[tokio::test]
    async fn test_deregister_idempotent() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.register("k", &["t".into()]).await.unwrap();
        db.deregister("k").await.unwrap();
        db.deregister("k").await.unwrap();
        assert!(db.keys_for_tag("t").await.unwrap().is_empty());
    }
}
