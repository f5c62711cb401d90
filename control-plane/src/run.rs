use crate::config::Config;
use config_sync::builder::{JsonResourceBuilder, ResourceBuilder};
use config_sync::events::channel_publisher;
use config_sync::factory::ActionFactory;
use config_sync::replica::Replica;
use config_sync::translator::ReplicaTranslator;
use config_sync::{
    BootstrapError, ReplicationError, ReplicationListener, SnapshotCacheManager, get_store,
};
use shared::admin_service::AdminService;
use shared::http::run_http_service;
use std::sync::Arc;
use tokio::task::JoinError;

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Replication(#[from] ReplicationError),
    #[error("replication worker stopped unexpectedly")]
    ReplicationStopped,
    #[error("replication worker failed: {0}")]
    ReplicationPanic(#[from] JoinError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    #[error("admin service failed: {0}")]
    Admin(#[source] std::io::Error),
}

fn worker_exit(result: Result<Result<(), ReplicationError>, JoinError>) -> RunError {
    match result {
        Ok(Ok(())) => RunError::ReplicationStopped,
        Ok(Err(err)) => err.into(),
        Err(err) => err.into(),
    }
}

/// Wires the replica, the snapshot cache and the replication listener
/// together and serves the admin endpoints until shutdown.
pub async fn run(config: Config) -> Result<(), RunError> {
    let store = get_store(&config.durable_store);
    let replica = Arc::new(Replica::new());
    let builder: Arc<dyn ResourceBuilder> = Arc::new(JsonResourceBuilder::new());
    let translator = Arc::new(ReplicaTranslator::new(
        replica.clone(),
        ActionFactory::new(builder.clone()),
    ));
    let manager = Arc::new(SnapshotCacheManager::new(
        store.clone(),
        replica.clone(),
        builder,
        translator,
    ));

    let (publisher, events) = channel_publisher();
    let listener = Arc::new(ReplicationListener::new(
        store,
        replica,
        Arc::new(publisher),
        config.replication.channel.clone(),
    ));

    let mut replication = listener.start().await?;
    tokio::select! {
        _ = listener.wait_synced() => {}
        result = &mut replication => return Err(worker_exit(result)),
    }

    manager
        .init_config_with_retry(&config.bootstrap.retry_policy())
        .await?;
    let _consumer = manager.clone().spawn_event_consumer(events);

    let ready_manager = manager.clone();
    let ready_listener = listener.clone();
    let status_manager = manager.clone();
    let admin = AdminService::new(
        // Not ready until the replica was loaded from the store
        move || ready_manager.is_ready() && ready_listener.is_synced(),
        move || {
            serde_json::to_string(&status_manager.status()).unwrap_or_else(|e| {
                tracing::error!("Could not encode status: {}", e);
                "{}".into()
            })
        },
    );
    let listener_config = &config.admin_listener;
    let admin_task = run_http_service::<_, std::io::Error>(
        &listener_config.host,
        listener_config.port,
        admin,
    );

    let result = tokio::select! {
        result = &mut replication => Err(worker_exit(result)),
        result = admin_task => result.map_err(RunError::Admin),
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            Ok(())
        }
    };

    listener.close();
    result
}
