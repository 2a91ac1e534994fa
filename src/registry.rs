use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::{
    buffer,
    config::LineSettings,
    device::DeviceFactory,
    error::Error,
    line::LineName,
    session::Session,
};

/// The authority on which lines are open.
///
/// At most one session exists per line name; a second open is rejected, not
/// queued. The session map is guarded by its own mutex, held only for map
/// lookups and mutations, never across device or buffer operations.
pub struct Registry {
    factory: Arc<dyn DeviceFactory>,
    rx_capacity: usize,
    lines: Mutex<LineTable>,
}

/// Open sessions plus the names currently being opened.
///
/// The `opening` set reserves a name while its device open is in flight, so
/// the map mutex itself never has to be held across the open. A reserved
/// name rejects concurrent opens just like a live session does.
#[derive(Debug, Default)]
struct LineTable {
    sessions: HashMap<LineName, Arc<Session>>,
    opening: HashSet<LineName>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("rx_capacity", &self.rx_capacity)
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// A registry opening devices through the given factory, with the
    /// default receive buffer capacity.
    pub fn new(factory: Arc<dyn DeviceFactory>) -> Self {
        Self {
            factory,
            rx_capacity: buffer::DEFAULT_CAPACITY,
            lines: Mutex::new(LineTable::default()),
        }
    }

    /// Override the receive buffer capacity used for sessions opened from
    /// now on.
    pub fn with_rx_capacity(mut self, rx_capacity: usize) -> Self {
        self.rx_capacity = rx_capacity;
        self
    }

    /// Open a line and register the session for it.
    ///
    /// Exactly one concurrent caller wins; the rest get
    /// [`Error::AlreadyOpen`]. The name is reserved under the map lock, but
    /// the device open itself runs with the lock released: a slow or
    /// blocking open on one line must not stall lookups and opens on
    /// others. A failed open drops the reservation.
    pub async fn open(
        &self,
        name: &LineName,
        settings: LineSettings,
    ) -> Result<Arc<Session>, Error> {
        {
            let mut lines = self.lines.lock().await;
            if lines.sessions.contains_key(name) || !lines.opening.insert(name.clone()) {
                return Err(Error::AlreadyOpen(name.as_str().to_string()));
            }
        }

        let opened = self.factory.open(name, &settings);

        let mut lines = self.lines.lock().await;
        lines.opening.remove(name);

        let device = opened?;
        let session = Arc::new(Session::new(device, settings, self.rx_capacity));

        info!(line = %name, settings = %session.settings(), "Line opened");
        lines.sessions.insert(name.clone(), Arc::clone(&session));

        Ok(session)
    }

    /// Look up the session for an open line.
    pub async fn get(&self, name: &LineName) -> Option<Arc<Session>> {
        self.lines.lock().await.sessions.get(name).cloned()
    }

    /// Close a line.
    ///
    /// The session is removed from the map first, so a concurrent open of
    /// the same name can succeed while teardown is still draining; the
    /// removed session then fails its in-flight writes and discards its
    /// buffer.
    pub async fn close(&self, name: &LineName) -> Result<(), Error> {
        let session = self
            .lines
            .lock()
            .await
            .sessions
            .remove(name)
            .ok_or_else(|| Error::NotOpen(name.as_str().to_string()))?;

        session.shutdown().await;
        info!(line = %name, "Line closed");

        Ok(())
    }

    /// The lines the host knows about, open or not.
    pub fn host_lines(&self) -> Result<Vec<LineName>, Error> {
        self.factory.lines()
    }

    /// Names of all currently open lines.
    pub async fn open_names(&self) -> Vec<LineName> {
        self.lines.lock().await.sessions.keys().cloned().collect()
    }

    /// Whether the named line has an open session.
    pub async fn is_open(&self, name: &LineName) -> bool {
        self.lines.lock().await.sessions.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::mock::MockDeviceFactory;
    use pretty_assertions::assert_eq;

    fn line(name: &str) -> LineName {
        LineName::canonicalize(name).unwrap()
    }

    fn registry() -> Registry {
        Registry::new(Arc::new(MockDeviceFactory::new()))
    }

    #[tokio::test]
    async fn second_open_is_rejected() {
        let registry = registry();
        let name = line("r0");

        registry.open(&name, LineSettings::default()).await.unwrap();

        assert!(matches!(
            registry.open(&name, LineSettings::default()).await,
            Err(Error::AlreadyOpen(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_opens_have_one_winner() {
        let registry = Arc::new(registry());
        let name = line("r1");

        let mut attempts = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let name = name.clone();
            attempts.push(tokio::spawn(async move {
                registry.open(&name, LineSettings::default()).await
            }));
        }

        let mut won = 0;
        let mut rejected = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => won += 1,
                Err(Error::AlreadyOpen(_)) => rejected += 1,
                Err(other) => panic!("Unexpected error: {other}"),
            }
        }

        assert_eq!(won, 1);
        assert_eq!(rejected, 7);
    }

    #[tokio::test]
    async fn failed_open_leaves_no_session_behind() {
        let factory = MockDeviceFactory::new();
        factory.refuse_opens();
        let registry = Registry::new(Arc::new(factory));
        let name = line("r2");

        assert!(matches!(
            registry.open(&name, LineSettings::default()).await,
            Err(Error::Device { .. })
        ));
        assert!(!registry.is_open(&name).await);

        // No reservation lingers either: a retry sees the device error
        // again, not AlreadyOpen.
        assert!(matches!(
            registry.open(&name, LineSettings::default()).await,
            Err(Error::Device { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn a_slow_open_does_not_stall_other_lines() {
        let factory = Arc::new(MockDeviceFactory::new());
        factory.delay_opens(std::time::Duration::from_millis(300));

        let registry = Arc::new(Registry::new(
            Arc::clone(&factory) as Arc<dyn crate::device::DeviceFactory>
        ));

        let slow = {
            let registry = Arc::clone(&registry);
            tokio::spawn(
                async move { registry.open(&line("slow0"), LineSettings::default()).await },
            )
        };

        // Let the slow open reach the factory.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // An unrelated line answers while the open is still in flight.
        let lookup = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            registry.get(&line("other0")),
        )
        .await;
        assert!(matches!(lookup, Ok(None)));

        // And the in-flight name is already reserved.
        let contested = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            registry.open(&line("slow0"), LineSettings::default()),
        )
        .await;
        assert!(matches!(contested, Ok(Err(Error::AlreadyOpen(_)))));

        slow.await.unwrap().unwrap();
        assert!(registry.is_open(&line("slow0")).await);
    }

    #[tokio::test]
    async fn close_allows_reopen() {
        let registry = registry();
        let name = line("r3");

        registry.open(&name, LineSettings::default()).await.unwrap();
        registry.close(&name).await.unwrap();

        assert!(!registry.is_open(&name).await);
        registry.open(&name, LineSettings::default()).await.unwrap();
    }

    #[tokio::test]
    async fn closing_a_line_that_is_not_open_fails() {
        let registry = registry();

        assert!(matches!(
            registry.close(&line("r4")).await,
            Err(Error::NotOpen(_))
        ));
    }

    #[tokio::test]
    async fn open_names_tracks_the_map() {
        let registry = registry();

        registry.open(&line("r5"), LineSettings::default()).await.unwrap();
        registry.open(&line("r6"), LineSettings::default()).await.unwrap();

        let mut names: Vec<_> = registry
            .open_names()
            .await
            .into_iter()
            .map(|n| n.as_str().to_string())
            .collect();
        names.sort();

        assert_eq!(names, vec!["/dev/r5", "/dev/r6"]);
    }
}
