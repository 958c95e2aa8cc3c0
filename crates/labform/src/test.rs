use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use crate::*;

/// An in-memory stand-in for a cloud account.
#[derive(Default)]
struct MemoryCloud {
    buckets: Mutex<BTreeMap<String, RemoteBucket>>,
    services: Mutex<BTreeMap<String, RemoteService>>,
    list_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    fail_list: AtomicBool,
    /// Every mutating call, in order.
    journal: Mutex<Vec<String>>,
    /// Bucket deletes, with whether the cached attributes were passed along.
    bucket_deletes: Mutex<Vec<(String, bool)>>,
}

impl MemoryCloud {
    fn with_buckets(names: &[&str]) -> Self {
        let cloud = MemoryCloud::default();
        for name in names {
            cloud.buckets.lock().unwrap().insert(
                name.to_string(),
                RemoteBucket {
                    arn: format!("arn:memory:bucket:{name}"),
                    region: "us-east-1".to_owned(),
                },
            );
        }
        cloud
    }

    fn lists(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
struct LocalBucket {
    region: String,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
struct RemoteBucket {
    arn: String,
    region: String,
}

impl ResourceAttributes for RemoteBucket {
    fn arn(&self) -> &str {
        &self.arn
    }
}

struct Buckets;

impl Service for Buckets {
    type Provider = MemoryCloud;
    type Definition = LocalBucket;
    type Attributes = RemoteBucket;
    type Error = String;

    const KIND: &'static str = "bucket";

    async fn do_list(
        &self,
        cloud: &Self::Provider,
    ) -> Result<BTreeMap<String, Self::Attributes>, Self::Error> {
        cloud.list_calls.fetch_add(1, Ordering::SeqCst);
        if cloud.fail_list.load(Ordering::SeqCst) {
            return Err("access denied".to_owned());
        }
        Ok(cloud.buckets.lock().unwrap().clone())
    }

    async fn do_create(
        &self,
        cloud: &Self::Provider,
        name: &str,
        definition: &Self::Definition,
    ) -> Result<Self::Attributes, Self::Error> {
        if name.starts_with("invalid") {
            return Err(format!("bucket name '{name}' is not allowed"));
        }
        cloud.journal.lock().unwrap().push(format!("create bucket {name}"));
        let bucket = RemoteBucket {
            arn: format!("arn:memory:bucket:{name}"),
            region: definition.region.clone(),
        };
        cloud
            .buckets
            .lock()
            .unwrap()
            .insert(name.to_owned(), bucket.clone());
        Ok(bucket)
    }

    async fn do_delete(
        &self,
        cloud: &Self::Provider,
        name: &str,
        _definition: &Self::Definition,
        existing: Option<&Self::Attributes>,
    ) -> Result<Removal, Self::Error> {
        cloud.delete_calls.fetch_add(1, Ordering::SeqCst);
        cloud.journal.lock().unwrap().push(format!("delete bucket {name}"));
        cloud
            .bucket_deletes
            .lock()
            .unwrap()
            .push((name.to_owned(), existing.is_some()));
        Ok(match cloud.buckets.lock().unwrap().remove(name) {
            Some(_) => Removal::Deleted,
            None => Removal::Absent,
        })
    }
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
struct LocalService {
    bucket: String,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
struct RemoteService {
    service_id: String,
}

impl ResourceAttributes for RemoteService {
    fn arn(&self) -> &str {
        &self.service_id
    }
}

struct Services;

impl Service for Services {
    type Provider = MemoryCloud;
    type Definition = LocalService;
    type Attributes = RemoteService;
    type Error = String;

    const KIND: &'static str = "service";

    async fn do_list(
        &self,
        cloud: &Self::Provider,
    ) -> Result<BTreeMap<String, Self::Attributes>, Self::Error> {
        Ok(cloud.services.lock().unwrap().clone())
    }

    async fn do_create(
        &self,
        cloud: &Self::Provider,
        name: &str,
        definition: &Self::Definition,
    ) -> Result<Self::Attributes, Self::Error> {
        let bucket_arn = cloud
            .buckets
            .lock()
            .unwrap()
            .get(&definition.bucket)
            .map(|b| b.arn.clone())
            .ok_or_else(|| format!("missing bucket {}", definition.bucket))?;
        cloud.journal.lock().unwrap().push(format!("create service {name}"));
        let service = RemoteService {
            service_id: format!("{name}@{bucket_arn}"),
        };
        cloud
            .services
            .lock()
            .unwrap()
            .insert(name.to_owned(), service.clone());
        Ok(service)
    }

    async fn do_delete(
        &self,
        cloud: &Self::Provider,
        name: &str,
        _definition: &Self::Definition,
        _existing: Option<&Self::Attributes>,
    ) -> Result<Removal, Self::Error> {
        cloud.journal.lock().unwrap().push(format!("delete service {name}"));
        Ok(match cloud.services.lock().unwrap().remove(name) {
            Some(_) => Removal::Deleted,
            None => Removal::Absent,
        })
    }
}

/// A kind whose provider calls fail the way SDK calls do, with the provider's
/// message underneath the context.
struct Grants;

impl Service for Grants {
    type Provider = MemoryCloud;
    type Definition = ();
    type Attributes = RemoteService;
    type Error = anyhow::Error;

    const KIND: &'static str = "grant";

    async fn do_list(
        &self,
        cloud: &Self::Provider,
    ) -> anyhow::Result<BTreeMap<String, Self::Attributes>> {
        use anyhow::Context;

        if cloud.fail_list.load(Ordering::SeqCst) {
            return Err(std::io::Error::other("AccessDeniedException: not authorized"))
                .context("could not list grants");
        }
        Ok(BTreeMap::default())
    }

    async fn do_create(
        &self,
        _: &Self::Provider,
        name: &str,
        _: &Self::Definition,
    ) -> anyhow::Result<Self::Attributes> {
        use anyhow::Context;

        Err(std::io::Error::other(
            "EntityAlreadyExistsException: grant exists",
        ))
        .with_context(|| format!("could not create grant {name}"))
    }

    async fn do_delete(
        &self,
        _: &Self::Provider,
        _: &str,
        _: &Self::Definition,
        _: Option<&Self::Attributes>,
    ) -> anyhow::Result<Removal> {
        Err(anyhow::anyhow!("DeleteConflictException: grant is in use")
            .context("could not delete grant"))
    }
}

fn bucket_definitions(names: &[&str]) -> Definitions<LocalBucket> {
    names
        .iter()
        .map(|name| {
            (
                name.to_string(),
                LocalBucket {
                    region: "eu-west-1".to_owned(),
                },
            )
        })
        .collect()
}

/// Verify that `create` skips resources that already exist remotely and
/// creates the rest.
#[tokio::test]
async fn create_skips_existing() {
    let _ = env_logger::builder().is_test(true).try_init();

    let cloud = MemoryCloud::with_buckets(&["a"]);
    let mut config = Config::new(Buckets, Some(bucket_definitions(&["a", "b"])));
    let report = config.create(&cloud).await.unwrap();

    assert_eq!(Status::Skipped, report.get("a").unwrap().status);
    assert_eq!(Status::Created, report.get("b").unwrap().status);
    assert_eq!("arn:memory:bucket:b", report.get("b").unwrap().detail);
    assert!(report.is_success());
    assert_eq!(vec!["create bucket b".to_owned()], cloud.journal());
    assert_eq!(
        "us-east-1",
        cloud.buckets.lock().unwrap()["a"].region,
        "the existing bucket must be left alone"
    );

    // Running it again is a no-op.
    let report = config.create(&cloud).await.unwrap();
    assert_eq!(2, report.count(Status::Skipped));
    assert_eq!(1, cloud.journal().len());
}

/// Verify that `delete` asks the provider about every defined name, even the
/// ones the last listing did not see.
#[tokio::test]
async fn delete_acts_unconditionally() {
    let _ = env_logger::builder().is_test(true).try_init();

    let cloud = MemoryCloud::with_buckets(&["a", "untouched"]);
    let mut config = Config::new(Buckets, Some(bucket_definitions(&["a", "b"])));
    let report = config.delete(&cloud).await.unwrap();

    assert_eq!(2, cloud.delete_calls.load(Ordering::SeqCst));
    assert_eq!(Status::Deleted, report.get("a").unwrap().status);
    assert_eq!("arn:memory:bucket:a", report.get("a").unwrap().detail);
    assert_eq!(Status::Absent, report.get("b").unwrap().status);
    assert!(report.is_success());
    assert!(cloud.buckets.lock().unwrap().contains_key("untouched"));
    assert!(config.is_dirty());
}

/// Verify that a listing is scoped to the defined names, or covers the whole
/// account when there are no definitions.
#[tokio::test]
async fn list_filters_to_definitions() {
    let _ = env_logger::builder().is_test(true).try_init();

    let cloud = MemoryCloud::with_buckets(&["a", "b", "c"]);

    let mut scoped = Config::new(Buckets, Some(bucket_definitions(&["a", "c", "d"])));
    let listing = scoped.list(&cloud).await.unwrap();
    assert_eq!(vec!["a", "c"], listing.names().collect::<Vec<_>>());
    assert_eq!(
        serde_json::json!({"arn": "arn:memory:bucket:a", "region": "us-east-1"}),
        listing.rows[0].1
    );

    let mut everything = Config::new(Buckets, None);
    let listing = everything.list(&cloud).await.unwrap();
    assert_eq!(3, listing.len());
}

/// Verify that the `dirty` flag gates re-fetching the remote state.
#[tokio::test]
async fn dirty_flag_gates_refresh() {
    let _ = env_logger::builder().is_test(true).try_init();

    let cloud = MemoryCloud::with_buckets(&["a"]);
    let mut config = Config::new(Buckets, Some(bucket_definitions(&["a", "b"])));
    assert!(config.is_dirty());

    assert_eq!("arn:memory:bucket:a", config.arn(&cloud, "a").await.unwrap());
    assert_eq!("arn:memory:bucket:a", config.arn(&cloud, "a").await.unwrap());
    assert_eq!(1, cloud.lists(), "a clean cache is not re-fetched");
    assert!(!config.is_dirty());

    config.create(&cloud).await.unwrap();
    assert_eq!(1, cloud.lists(), "create reuses the clean cache");
    assert!(config.is_dirty());

    assert_eq!("arn:memory:bucket:b", config.arn(&cloud, "b").await.unwrap());
    assert_eq!(2, cloud.lists(), "a mutation marks the cache dirty");

    // `list` always goes to the provider.
    config.list(&cloud).await.unwrap();
    config.list(&cloud).await.unwrap();
    assert_eq!(4, cloud.lists());
}

/// Verify that a lookup miss re-fetches once before failing.
#[tokio::test]
async fn lookup_miss_refetches_then_fails() {
    let _ = env_logger::builder().is_test(true).try_init();

    let cloud = MemoryCloud::with_buckets(&["a"]);
    let mut config = Config::new(Buckets, None);
    config.refresh(&cloud).await.unwrap();
    assert_eq!(1, cloud.lists());

    // Created behind the config's back.
    cloud.buckets.lock().unwrap().insert(
        "late".to_owned(),
        RemoteBucket {
            arn: "arn:memory:bucket:late".to_owned(),
            region: "us-east-1".to_owned(),
        },
    );
    assert_eq!(
        "arn:memory:bucket:late",
        config.arn(&cloud, "late").await.unwrap()
    );
    assert_eq!(2, cloud.lists());

    let err = config.arn(&cloud, "nope").await.unwrap_err();
    assert!(
        matches!(&err, Error::MissingResource { kind: "bucket", name } if name == "nope"),
        "unexpected error: {err}"
    );
    assert_eq!(3, cloud.lists());
}

/// Verify that a failure to list aborts `create` before anything is created.
#[tokio::test]
async fn refresh_failure_aborts_create() {
    let _ = env_logger::builder().is_test(true).try_init();

    let cloud = MemoryCloud::default();
    cloud.fail_list.store(true, Ordering::SeqCst);
    let mut config = Config::new(Buckets, Some(bucket_definitions(&["a"])));
    let err = config.create(&cloud).await.unwrap_err();
    assert!(matches!(err, Error::Refresh { kind: "bucket", .. }));
    assert!(err.to_string().contains("access denied"));
    assert!(cloud.journal().is_empty());
}

/// Verify that one failing definition does not stop the others.
#[tokio::test]
async fn create_failure_is_reported_per_entry() {
    let _ = env_logger::builder().is_test(true).try_init();

    let cloud = MemoryCloud::default();
    let mut config = Config::new(Buckets, Some(bucket_definitions(&["invalid-x", "ok"])));
    let report = config.create(&cloud).await.unwrap();

    assert!(!report.is_success());
    let failed = report.get("invalid-x").unwrap();
    assert_eq!(Status::Failed, failed.status);
    assert_eq!("bucket name 'invalid-x' is not allowed", failed.detail);
    assert_eq!(Status::Created, report.get("ok").unwrap().status);
}

/// Verify that failure details carry the provider's message, not just the
/// outermost context.
#[tokio::test]
async fn failure_detail_has_the_provider_message() {
    let _ = env_logger::builder().is_test(true).try_init();

    let cloud = MemoryCloud::default();
    let mut config = Config::new(Grants, Some(Definitions::from([("g".to_owned(), ())])));

    let report = config.create(&cloud).await.unwrap();
    let entry = report.get("g").unwrap();
    assert_eq!(Status::Failed, entry.status);
    assert_eq!(
        "could not create grant g: EntityAlreadyExistsException: grant exists",
        entry.detail
    );

    let report = config.delete(&cloud).await.unwrap();
    assert_eq!(
        "could not delete grant: DeleteConflictException: grant is in use",
        report.get("g").unwrap().detail
    );

    cloud.fail_list.store(true, Ordering::SeqCst);
    config.mark_dirty();
    let err = config.create(&cloud).await.unwrap_err();
    assert!(
        err.to_string()
            .ends_with("could not list grants: AccessDeniedException: not authorized"),
        "unexpected error: {err}"
    );
}

/// Verify that `delete` hands over the cached attributes of resources the
/// listing saw, and nothing for the ones it did not.
#[tokio::test]
async fn delete_passes_cached_attributes() {
    let _ = env_logger::builder().is_test(true).try_init();

    let cloud = MemoryCloud::with_buckets(&["listed"]);
    let mut config = Config::new(Buckets, Some(bucket_definitions(&["listed", "unlisted"])));
    config.delete(&cloud).await.unwrap();

    assert_eq!(
        vec![("listed".to_owned(), true), ("unlisted".to_owned(), false)],
        *cloud.bucket_deletes.lock().unwrap()
    );
}

/// Verify that a config without definitions creates and deletes nothing.
#[tokio::test]
async fn no_definitions_is_a_no_op() {
    let _ = env_logger::builder().is_test(true).try_init();

    let cloud = MemoryCloud::with_buckets(&["a"]);
    let mut config = Config::new(Buckets, None);
    assert!(config.create(&cloud).await.unwrap().entries.is_empty());
    assert!(config.delete(&cloud).await.unwrap().entries.is_empty());
    assert_eq!(0, cloud.lists());
    assert!(cloud.journal().is_empty());
}

/// Verify that `action` dispatches to the matching operation.
#[tokio::test]
async fn action_dispatch() {
    let _ = env_logger::builder().is_test(true).try_init();

    let cloud = MemoryCloud::default();
    let mut config = Config::new(Buckets, Some(bucket_definitions(&["a"])));

    let report = config.action(&cloud, Action::Create).await.unwrap();
    assert_eq!(Action::Create, report.action);
    assert_eq!(Status::Created, report.entries[0].status);

    let report = config.action(&cloud, Action::List).await.unwrap();
    assert!(report.entries.is_empty());

    let report = config.action(&cloud, Action::Delete).await.unwrap();
    assert_eq!(Status::Deleted, report.entries[0].status);
}

fn project(cloud: MemoryCloud) -> Project<MemoryCloud> {
    let mut project = Project::new("memory-project", cloud);
    project.add_config(Buckets, Some(bucket_definitions(&["data"])));
    project.add_config(
        Services,
        Some(
            [(
                "api".to_owned(),
                LocalService {
                    bucket: "data".to_owned(),
                },
            )]
            .into_iter()
            .collect(),
        ),
    );
    project
}

/// Verify that a project creates in registration order and deletes in
/// reverse.
#[tokio::test]
async fn project_orders_configs() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut project = project(MemoryCloud::default());
    assert_eq!(vec!["bucket", "service"], project.kinds());

    let reports = project.create(None).await.unwrap();
    assert_eq!(
        vec!["bucket", "service"],
        reports.iter().map(|r| r.kind).collect::<Vec<_>>()
    );
    assert!(reports.iter().all(Report::is_success));

    let listings = project.list(None).await.unwrap();
    assert_eq!(vec![1, 1], listings.iter().map(Listing::len).collect::<Vec<_>>());

    let reports = project.delete(None).await.unwrap();
    assert_eq!(
        vec!["service", "bucket"],
        reports.iter().map(|r| r.kind).collect::<Vec<_>>()
    );
    pretty_assertions::assert_eq!(
        vec![
            "create bucket data",
            "create service api",
            "delete service api",
            "delete bucket data",
        ],
        project.provider().journal()
    );
}

/// Verify that one kind failing to list does not stop the other kinds.
#[tokio::test]
async fn project_continues_past_listing_failures() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut project = project(MemoryCloud::default());
    project.create(None).await.unwrap();
    project.provider().fail_list.store(true, Ordering::SeqCst);

    let reports = project.delete(None).await.unwrap();
    assert_eq!(
        vec!["service", "bucket"],
        reports.iter().map(|r| r.kind).collect::<Vec<_>>()
    );
    assert_eq!(Status::Deleted, reports[0].get("api").unwrap().status);
    let unlisted = reports[1].get("*").unwrap();
    assert_eq!(Status::Failed, unlisted.status);
    assert!(unlisted.detail.contains("access denied"), "{}", unlisted.detail);
    assert_eq!(1, reports[1].entries.len());
    assert_eq!(
        vec!["create bucket data", "create service api", "delete service api"],
        project.provider().journal()
    );

    // Creating runs the later kinds too.
    let reports = project.create(None).await.unwrap();
    assert_eq!(Status::Failed, reports[0].get("*").unwrap().status);
    assert_eq!(Status::Created, reports[1].get("api").unwrap().status);
}

/// Verify that a single kind can be addressed, and unknown kinds are errors.
#[tokio::test]
async fn project_selects_by_kind() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut project = project(MemoryCloud::default());
    let reports = project.action(Action::Create, Some("bucket")).await.unwrap();
    assert_eq!(1, reports.len());
    assert_eq!(vec!["create bucket data"], project.provider().journal());

    let err = project.create(Some("queue")).await.unwrap_err();
    assert!(matches!(
        err,
        Error::UnknownConfig { ref project, ref kind }
            if project == "memory-project" && kind == "queue"
    ));
}

/// Verify typed access to configs inside a project, and that registering a
/// kind again replaces the config.
#[tokio::test]
async fn project_typed_access() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut project = project(MemoryCloud::with_buckets(&["data"]));
    assert!(project.config::<Buckets>().is_ok());
    assert!(matches!(
        project.config::<Grants>(),
        Err(Error::UnknownConfig { ref kind, .. }) if kind == "grant"
    ));

    {
        let (config, cloud) = project.config_with_provider::<Buckets>().unwrap();
        assert_eq!("arn:memory:bucket:data", config.arn(cloud, "data").await.unwrap());
    }

    project.add_config(Buckets, None);
    assert_eq!(vec!["bucket", "service"], project.kinds());
    let config = project.config_mut::<Buckets>().unwrap();
    assert!(config.definitions().is_none());
    assert!(config.is_dirty(), "the replacement starts with an empty cache");
}

#[test]
fn action_parses() {
    assert_eq!(Ok(Action::Delete), "delete".parse::<Action>());
    assert_eq!("list", Action::List.to_string());
    assert!("destroy".parse::<Action>().is_err());
}
