// src/unread.rs

use std::collections::HashMap;

use futures_util::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, Document};

use crate::db::MongoDB;
use crate::errors::ChatError;
use crate::models::{parse_object_id, ChatRoom, Message};

/// Messages of `room_id` that count as unread for `user_id`: authored by
/// someone else, carrying no receipt from the user, not soft-deleted.
pub fn unread_filter(room_id: ObjectId, user_id: ObjectId) -> Document {
    doc! {
        "roomId": room_id,
        "senderId": { "$ne": user_id },
        "readBy.user": { "$ne": user_id },
        "isDeleted": { "$ne": true },
    }
}

/// Total unread messages across every room the user belongs to. Derived on
/// demand; nothing caches these counts, so a receipt write is visible to the
/// next call immediately.
pub async fn unread_count(db: &MongoDB, user_id: &str) -> Result<u64, ChatError> {
    let uid = parse_object_id(user_id, "user")?;
    let messages = db.db.collection::<Message>("messages");

    let mut total = 0u64;
    for room in member_rooms(db, uid).await? {
        total += messages.count_documents(unread_filter(room.id, uid)).await?;
    }
    Ok(total)
}

/// Unread counts keyed by the owning project's hex id, one entry per room
/// the user belongs to (zero entries included, so clients can clear badges).
pub async fn unread_counts_by_project(
    db: &MongoDB,
    user_id: &str,
) -> Result<HashMap<String, u64>, ChatError> {
    let uid = parse_object_id(user_id, "user")?;
    let messages = db.db.collection::<Message>("messages");

    let mut counts = HashMap::new();
    for room in member_rooms(db, uid).await? {
        let unread = messages.count_documents(unread_filter(room.id, uid)).await?;
        counts.insert(room.project_id.to_hex(), unread);
    }
    Ok(counts)
}

async fn member_rooms(db: &MongoDB, uid: ObjectId) -> Result<Vec<ChatRoom>, ChatError> {
    let rooms = db
        .db
        .collection::<ChatRoom>("chatrooms")
        .find(doc! { "members": uid })
        .await?
        .try_collect()
        .await?;
    Ok(rooms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::Bson;

    #[test]
    fn test_unread_filter_shape() {
        let room = ObjectId::new();
        let user = ObjectId::new();
        let filter = unread_filter(room, user);

        assert_eq!(filter.get("roomId"), Some(&Bson::ObjectId(room)));
        assert_eq!(
            filter.get_document("senderId").unwrap().get("$ne"),
            Some(&Bson::ObjectId(user))
        );
        assert_eq!(
            filter.get_document("readBy.user").unwrap().get("$ne"),
            Some(&Bson::ObjectId(user))
        );
        // Soft-deleted messages never count, and documents with no
        // isDeleted field at all still match the $ne form.
        assert_eq!(
            filter.get_document("isDeleted").unwrap().get("$ne"),
            Some(&Bson::Boolean(true))
        );
    }

    #[actix_web::test]
    async fn test_unread_count_rejects_malformed_user_id() {
        let db = crate::db::MongoDB::init("mongodb://localhost:27017", "chat_test").await;
        let err = unread_count(&db, "not-hex").await.unwrap_err();
        assert!(matches!(err, ChatError::MalformedId("user")));

        let err = unread_counts_by_project(&db, "not-hex").await.unwrap_err();
        assert!(matches!(err, ChatError::MalformedId("user")));
    }
}
