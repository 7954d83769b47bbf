// src/rooms.rs

use log::{debug, info};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, DateTime};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::Collection;

use crate::config::AuthorizationMode;
use crate::db::MongoDB;
use crate::errors::ChatError;
use crate::models::{parse_object_id, ChatRoom, Project, Role, User};

/// Denial reason for a failed access check. Clients match on the rendered
/// `Unauthorized: ...` line, so the text is load-bearing.
const ACCESS_DENIED: &str =
    "Only Admins, Project Managers, and the assigned Client can access this chat.";

/// Looks up the project's chat room, creating it on first join.
///
/// Strict mode re-verifies access on every resolve; trusting mode leaves
/// authorization to the tier that issued the token and never loads project
/// or user documents.
pub async fn resolve_or_create(
    db: &MongoDB,
    mode: AuthorizationMode,
    project_id: &str,
    user_id: &str,
) -> Result<ChatRoom, ChatError> {
    let pid = parse_object_id(project_id, "project")?;
    let uid = parse_object_id(user_id, "user")?;

    let context = match mode {
        AuthorizationMode::Strict => {
            let project = db
                .db
                .collection::<Project>("projects")
                .find_one(doc! { "_id": pid })
                .await?
                .ok_or(ChatError::ProjectNotFound)?;
            let user = db
                .db
                .collection::<User>("users")
                .find_one(doc! { "_id": uid })
                .await?
                .ok_or(ChatError::UserNotFound)?;
            if !authorized(&user, &project) {
                return Err(ChatError::Unauthorized(ACCESS_DENIED.to_string()));
            }
            Some((project, user))
        }
        AuthorizationMode::Trusting => None,
    };

    let rooms = db.db.collection::<ChatRoom>("chatrooms");
    let mut room = match rooms.find_one(doc! { "projectId": pid }).await? {
        Some(room) => room,
        None => {
            let members = match &context {
                Some((project, user)) => {
                    let client = resolve_client(db, project, user).await?;
                    initial_members(project, uid, client)
                }
                None => vec![uid],
            };
            create_room(&rooms, pid, members).await?
        }
    };

    if !room.members.contains(&uid) {
        rooms
            .update_one(
                doc! { "_id": room.id },
                doc! {
                    "$addToSet": { "members": uid },
                    "$set": { "updatedAt": DateTime::now() },
                },
            )
            .await?;
        room.members.push(uid);
    }

    Ok(room)
}

/// True iff the user appears in the room's member set. A missing room is
/// simply `false`.
pub async fn verify_membership(
    db: &MongoDB,
    user_id: &str,
    room_id: &str,
) -> Result<bool, ChatError> {
    let uid = parse_object_id(user_id, "user")?;
    let rid = parse_object_id(room_id, "room")?;
    let count = db
        .db
        .collection::<ChatRoom>("chatrooms")
        .count_documents(doc! { "_id": rid, "members": uid })
        .await?;
    Ok(count > 0)
}

/// Access policy for a project's chat: admins, the project manager, and the
/// client whose email the project records.
pub fn authorized(user: &User, project: &Project) -> bool {
    if user.role == Role::Admin || project.manager == user.id {
        return true;
    }
    matches!(
        project.client_email.as_deref(),
        Some(email) if !email.is_empty() && email == user.email
    )
}

/// First-join member seed: manager, client (when resolvable), requester.
/// Deduplicated, so a manager opening their own project yields one entry.
fn initial_members(
    project: &Project,
    requester: ObjectId,
    client: Option<ObjectId>,
) -> Vec<ObjectId> {
    let mut members = vec![project.manager];
    if let Some(client) = client {
        if !members.contains(&client) {
            members.push(client);
        }
    }
    if !members.contains(&requester) {
        members.push(requester);
    }
    members
}

/// The requester is the client when their email matches; otherwise the
/// client is looked up by the project's recorded email, and may not exist
/// yet (accounts can lag project setup).
async fn resolve_client(
    db: &MongoDB,
    project: &Project,
    requester: &User,
) -> Result<Option<ObjectId>, ChatError> {
    let email = match project.client_email.as_deref() {
        Some(email) if !email.is_empty() => email,
        _ => return Ok(None),
    };
    if email == requester.email {
        return Ok(Some(requester.id));
    }
    let client = db
        .db
        .collection::<User>("users")
        .find_one(doc! { "email": email })
        .await?;
    Ok(client.map(|u| u.id))
}

async fn create_room(
    rooms: &Collection<ChatRoom>,
    pid: ObjectId,
    members: Vec<ObjectId>,
) -> Result<ChatRoom, ChatError> {
    let room = ChatRoom::new(pid, members);
    match rooms.insert_one(&room).await {
        Ok(_) => {
            info!("created chat room {} for project {}", room.id, pid);
            Ok(room)
        }
        Err(err) if is_duplicate_key(&err) => {
            // Another connection won the first-join race on the unique
            // projectId index; their row is authoritative.
            debug!("room create for project {} lost the index race", pid);
            rooms
                .find_one(doc! { "projectId": pid })
                .await?
                .ok_or(ChatError::RoomNotFound)
        }
        Err(err) => Err(err.into()),
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        &*err.kind,
        ErrorKind::Write(WriteFailure::WriteError(write_err)) if write_err.code == 11000
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project(manager: ObjectId, client_email: Option<&str>) -> Project {
        Project {
            id: ObjectId::new(),
            name: "Website Redesign".to_string(),
            project_code: None,
            manager,
            client_email: client_email.map(str::to_owned),
            engineers: Vec::new(),
            status: None,
        }
    }

    fn user(id: ObjectId, role: Role, email: &str) -> User {
        User {
            id,
            name: "Someone".to_string(),
            email: email.to_string(),
            role,
        }
    }

    #[test]
    fn test_admin_is_always_authorized() {
        let admin = user(ObjectId::new(), Role::Admin, "admin@example.com");
        let p = project(ObjectId::new(), Some("client@example.com"));
        assert!(authorized(&admin, &p));
    }

    #[test]
    fn test_manager_is_authorized() {
        let manager_id = ObjectId::new();
        let manager = user(manager_id, Role::Manager, "pm@example.com");
        let p = project(manager_id, None);
        assert!(authorized(&manager, &p));
    }

    #[test]
    fn test_client_email_match_is_authorized() {
        let client = user(ObjectId::new(), Role::Client, "client@example.com");
        let p = project(ObjectId::new(), Some("client@example.com"));
        assert!(authorized(&client, &p));
    }

    #[test]
    fn test_unrelated_user_is_not_authorized() {
        let outsider = user(ObjectId::new(), Role::Engineer, "eng@example.com");
        let p = project(ObjectId::new(), Some("client@example.com"));
        assert!(!authorized(&outsider, &p));
    }

    #[test]
    fn test_denial_line_names_the_allowed_roles() {
        let rendered = ChatError::Unauthorized(ACCESS_DENIED.to_string()).to_string();
        assert_eq!(
            rendered,
            "Unauthorized: Only Admins, Project Managers, and the assigned Client can access this chat."
        );
    }

    #[test]
    fn test_empty_client_email_never_matches() {
        let blank = user(ObjectId::new(), Role::User, "");
        let p = project(ObjectId::new(), Some(""));
        assert!(!authorized(&blank, &p));
    }

    #[test]
    fn test_initial_members_deduplicates() {
        let manager_id = ObjectId::new();
        let p = project(manager_id, None);

        // Manager joining their own project seeds a single entry.
        assert_eq!(initial_members(&p, manager_id, None), vec![manager_id]);

        // Requester who is also the resolved client appears once.
        let requester = ObjectId::new();
        let members = initial_members(&p, requester, Some(requester));
        assert_eq!(members, vec![manager_id, requester]);
    }

    #[test]
    fn test_initial_members_includes_distinct_client() {
        let manager_id = ObjectId::new();
        let client_id = ObjectId::new();
        let requester = ObjectId::new();
        let p = project(manager_id, Some("client@example.com"));
        let members = initial_members(&p, requester, Some(client_id));
        assert_eq!(members, vec![manager_id, client_id, requester]);
    }

    #[actix_web::test]
    async fn test_resolve_rejects_malformed_ids_before_io() {
        // Parsing an unconnected client URI performs no network I/O, so the
        // early validation path is exercised without a running database.
        let db = MongoDB::init("mongodb://localhost:27017", "chat_test").await;

        let err = resolve_or_create(
            &db,
            AuthorizationMode::Strict,
            "not-an-id",
            "507f191e810c19729de860ea",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ChatError::MalformedId("project")));

        let err = resolve_or_create(
            &db,
            AuthorizationMode::Trusting,
            "507f191e810c19729de860ea",
            "not-an-id",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ChatError::MalformedId("user")));
    }

    #[actix_web::test]
    async fn test_verify_membership_rejects_malformed_ids() {
        let db = MongoDB::init("mongodb://localhost:27017", "chat_test").await;
        let err = verify_membership(&db, "bad", "507f191e810c19729de860ea")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::MalformedId("user")));
    }
}
