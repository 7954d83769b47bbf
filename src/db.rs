use mongodb::bson::doc;
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Database, IndexModel};

pub struct MongoDB {
    pub client: Client,
    pub db: Database,
}

impl MongoDB {
    pub async fn init(uri: &str, db_name: &str) -> Self {
        let client_options = ClientOptions::parse(uri)
            .await
            .expect("Failed to parse MongoDB connection string");
        let client = Client::with_options(client_options).expect("Failed to initialize client");
        let db = client.database(db_name);
        MongoDB { client, db }
    }

    /// Creates the indexes the chat core relies on. The unique `projectId`
    /// index on `chatrooms` is the arbiter for concurrent first-join room
    /// creation, so startup fails loudly if it cannot be built.
    pub async fn ensure_indexes(&self) -> mongodb::error::Result<()> {
        let rooms = self.db.collection::<crate::models::ChatRoom>("chatrooms");
        rooms
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "projectId": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;

        let messages = self.db.collection::<crate::models::Message>("messages");
        messages
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "roomId": 1, "createdAt": 1 })
                    .build(),
            )
            .await?;

        let push_tokens = self.db.collection::<crate::models::PushToken>("pushtokens");
        push_tokens
            .create_index(IndexModel::builder().keys(doc! { "userId": 1 }).build())
            .await?;
        push_tokens
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "token": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await?;

        Ok(())
    }
}
