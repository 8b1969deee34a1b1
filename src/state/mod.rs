//! Durable safety state: the current term, the vote cast in it and the membership view.
//!
//! Everything here must be persisted before it is acted upon.

mod core_state;
mod membership_state;
mod storage_error;
mod term_state;
mod vote_state;

use std::fmt::Debug;
use std::io;
use std::marker::PhantomData;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub use self::core_state::RaftCoreState;
pub use self::membership_state::MembershipEntry;
pub use self::membership_state::RaftMembershipState;
pub use self::storage_error::ErrorSubject;
pub use self::storage_error::ErrorVerb;
pub use self::storage_error::StorageError;
pub use self::storage_error::StorageIOError;
pub use self::term_state::TermState;
pub use self::vote_state::VoteState;
use crate::marshal::JsonMarshal;
use crate::marshal::Marshal;

/// A value that is kept by a `StateStorage`.
pub trait PersistedState: Debug + Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Used to tag storage errors.
    const SUBJECT: ErrorSubject;

    /// Name of the file a file backed storage keeps this value in.
    const FILE_NAME: &'static str;
}

impl PersistedState for TermState {
    const SUBJECT: ErrorSubject = ErrorSubject::TermState;
    const FILE_NAME: &'static str = "term-state";
}

impl PersistedState for VoteState {
    const SUBJECT: ErrorSubject = ErrorSubject::VoteState;
    const FILE_NAME: &'static str = "vote-state";
}

impl PersistedState for RaftMembershipState {
    const SUBJECT: ErrorSubject = ErrorSubject::MembershipState;
    const FILE_NAME: &'static str = "membership-state";
}

/// Durable storage of a single value.
///
/// `persist()` returns only after the value is durable.
#[async_trait]
pub trait StateStorage<T>: Send + Sync + 'static
where T: PersistedState
{
    /// The last persisted value, or the default value if nothing was ever persisted.
    async fn initial_state(&self) -> Result<T, StorageError>;

    async fn persist(&self, state: &T) -> Result<(), StorageError>;
}

/// The storages of the three durable values of a member.
#[derive(Clone)]
pub struct RaftStores {
    pub term: Arc<dyn StateStorage<TermState>>,
    pub vote: Arc<dyn StateStorage<VoteState>>,
    pub membership: Arc<dyn StateStorage<RaftMembershipState>>,
}

impl RaftStores {
    pub fn in_memory() -> Self {
        Self {
            term: Arc::new(InMemoryStateStorage::<TermState>::default()),
            vote: Arc::new(InMemoryStateStorage::<VoteState>::default()),
            membership: Arc::new(InMemoryStateStorage::<RaftMembershipState>::default()),
        }
    }

    /// File backed storages, one file per value, all under `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            term: Arc::new(FileStateStorage::<TermState>::new(dir)),
            vote: Arc::new(FileStateStorage::<VoteState>::new(dir)),
            membership: Arc::new(FileStateStorage::<RaftMembershipState>::new(dir)),
        }
    }
}

/// A `StateStorage` that keeps the value in memory.
///
/// It survives a restart of the raft task as long as the same instance is handed to the new one.
#[derive(Debug, Default)]
pub struct InMemoryStateStorage<T> {
    state: Mutex<T>,
    persist_count: AtomicU64,
    failing: AtomicBool,
}

impl<T> InMemoryStateStorage<T>
where T: PersistedState
{
    pub fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            persist_count: AtomicU64::new(0),
            failing: AtomicBool::new(false),
        }
    }

    /// The number of successful `persist()` calls.
    pub fn persist_count(&self) -> u64 {
        self.persist_count.load(Ordering::Relaxed)
    }

    /// Make every following `persist()` fail with an io error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }
}

#[async_trait]
impl<T> StateStorage<T> for InMemoryStateStorage<T>
where T: PersistedState
{
    #[tracing::instrument(level = "trace", skip(self))]
    async fn initial_state(&self) -> Result<T, StorageError> {
        Ok(self.state.lock().await.clone())
    }

    #[tracing::instrument(level = "trace", skip(self))]
    async fn persist(&self, state: &T) -> Result<(), StorageError> {
        if self.failing.load(Ordering::Relaxed) {
            let err = io::Error::new(io::ErrorKind::Other, "injected persist failure");
            return Err(StorageError::io(T::SUBJECT, ErrorVerb::Write, &err));
        }

        *self.state.lock().await = state.clone();
        self.persist_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// A `StateStorage` that keeps the value in a file under `dir`.
///
/// A new value is written and synced to a temporary file which then replaces the old one, and the
/// directory is synced too. A crash leaves either the old or the new value behind.
pub struct FileStateStorage<T, M = JsonMarshal> {
    path: PathBuf,
    marshal: M,
    _p: PhantomData<fn() -> T>,
}

impl<T> FileStateStorage<T, JsonMarshal>
where T: PersistedState
{
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::with_marshal(dir, JsonMarshal)
    }
}

impl<T, M> FileStateStorage<T, M>
where
    T: PersistedState,
    M: Marshal<T>,
{
    pub fn with_marshal(dir: impl AsRef<Path>, marshal: M) -> Self {
        Self {
            path: dir.as_ref().join(T::FILE_NAME),
            marshal,
            _p: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl<T, M> StateStorage<T> for FileStateStorage<T, M>
where
    T: PersistedState,
    M: Marshal<T>,
{
    #[tracing::instrument(level = "trace", skip(self), fields(path=%self.path.display()))]
    async fn initial_state(&self) -> Result<T, StorageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(x) => x,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("no persisted {:?}, use default", T::SUBJECT);
                return Ok(T::default());
            }
            Err(e) => return Err(StorageError::io(T::SUBJECT, ErrorVerb::Read, &e)),
        };

        self.marshal.unmarshal(&bytes).map_err(|e| StorageError::io(T::SUBJECT, ErrorVerb::Read, &e))
    }

    #[tracing::instrument(level = "trace", skip(self), fields(path=%self.path.display()))]
    async fn persist(&self, state: &T) -> Result<(), StorageError> {
        let write_err = |e: io::Error| StorageError::io(T::SUBJECT, ErrorVerb::Write, &e);

        let bytes = self.marshal.marshal(state).map_err(|e| StorageError::io(T::SUBJECT, ErrorVerb::Write, &e))?;

        let tmp = self.path.with_extension("tmp");
        {
            let mut f = tokio::fs::File::create(&tmp).await.map_err(write_err)?;
            f.write_all(&bytes).await.map_err(write_err)?;
            f.sync_all().await.map_err(write_err)?;
        }

        tokio::fs::rename(&tmp, &self.path).await.map_err(write_err)?;
        self.sync_dir().await.map_err(write_err)?;

        Ok(())
    }
}

impl<T, M> FileStateStorage<T, M> {
    /// Make the rename durable: it is an update of the directory.
    #[cfg(unix)]
    async fn sync_dir(&self) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        tokio::fs::File::open(dir).await?.sync_all().await
    }

    #[cfg(not(unix))]
    async fn sync_dir(&self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use maplit::btreeset;

    use super::*;

    #[tokio::test]
    async fn test_file_state_storage_survives_reopen() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;

        {
            let sto = FileStateStorage::<VoteState>::new(dir.path());
            assert_eq!(VoteState::default(), sto.initial_state().await?);

            sto.persist(&VoteState::new(Some(2), 5)).await?;
            sto.persist(&VoteState::new(Some(3), 6)).await?;
        }

        let sto = FileStateStorage::<VoteState>::new(dir.path());
        assert_eq!(VoteState::new(Some(3), 6), sto.initial_state().await?);

        let mut ms = RaftMembershipState::default();
        ms.append(0, btreeset! {1,2,3})?;
        ms.commit(0);

        let msto = FileStateStorage::<RaftMembershipState>::new(dir.path());
        msto.persist(&ms).await?;
        assert_eq!(ms, msto.initial_state().await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_file_state_storage_leaves_no_temp_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let sto = FileStateStorage::<TermState>::new(dir.path());

        sto.persist(&TermState::new(7)).await?;

        assert!(sto.path().exists());
        assert!(!sto.path().with_extension("tmp").exists());
        assert_eq!(TermState::new(7), sto.initial_state().await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_file_state_storage_write_error() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let sto = FileStateStorage::<TermState>::new(dir.path().join("missing"));

        let res = sto.persist(&TermState::new(1)).await;
        match res {
            Err(StorageError::IO { source }) => assert_eq!(&ErrorSubject::TermState, source.subject()),
            other => panic!("expect io error, got: {:?}", other),
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_file_state_storage_corrupted() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let sto = FileStateStorage::<TermState>::new(dir.path());

        tokio::fs::write(sto.path(), b"{").await?;

        let res = sto.initial_state().await;
        assert!(matches!(res, Err(StorageError::IO { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_in_memory_state_storage_failing() -> anyhow::Result<()> {
        let sto = InMemoryStateStorage::new(TermState::new(1));

        sto.persist(&TermState::new(2)).await?;
        assert_eq!(1, sto.persist_count());

        sto.set_failing(true);
        let res = sto.persist(&TermState::new(3)).await;
        assert!(res.is_err());
        assert_eq!(TermState::new(2), sto.initial_state().await?);

        Ok(())
    }
}
