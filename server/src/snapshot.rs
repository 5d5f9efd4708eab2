//! Status values reported in info replies
//!
//! Static values are captured once from the host at activation. The
//! overridable ones are changed afterwards through the console variables.

use crate::host::HostInfo;
use log::debug;
use qcache_shared::{InfoReply, OS_WINDOWS, SECURED, SERVER_TYPE_DEDICATED};

/// Version string reported until overridden
pub const DEFAULT_GAME_VERSION: &str = "1.0.1.59";
/// Protocol version reported until overridden
pub const DEFAULT_PROTOCOL_VERSION: i32 = 14;

/// Game directory whose host-side description is stale
pub const EMPIRES_GAME_DIR: &str = "empires";
/// Description forced for [`EMPIRES_GAME_DIR`]
pub const EMPIRES_DESCRIPTION: &str = "Empires v2.24d";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    game_directory: String,
    game_description: String,
    game_version: String,
    protocol_version: i32,
    app_id: u32,
    advertised_max_clients: u32,
    real_max_clients: u32,
}

impl StatusSnapshot {
    /// Reads the values that stay fixed for the host session
    ///
    /// Must run after the host is fully initialized.
    pub fn initialize_static(host: &dyn HostInfo) -> Self {
        let game_directory = last_path_component(&host.game_dir()).to_string();

        let game_description = if game_directory == EMPIRES_GAME_DIR {
            EMPIRES_DESCRIPTION.to_string()
        } else {
            host.game_description()
        };

        let real_max_clients = host.max_clients();

        Self {
            game_directory,
            game_description,
            game_version: DEFAULT_GAME_VERSION.to_string(),
            protocol_version: DEFAULT_PROTOCOL_VERSION,
            app_id: host.app_id(),
            advertised_max_clients: real_max_clients,
            real_max_clients,
        }
    }

    pub fn game_directory(&self) -> &str {
        &self.game_directory
    }

    pub fn game_description(&self) -> &str {
        &self.game_description
    }

    pub fn game_version(&self) -> &str {
        &self.game_version
    }

    pub fn protocol_version(&self) -> i32 {
        self.protocol_version
    }

    pub fn app_id(&self) -> u32 {
        self.app_id
    }

    pub fn advertised_max_clients(&self) -> u32 {
        self.advertised_max_clients
    }

    pub fn real_max_clients(&self) -> u32 {
        self.real_max_clients
    }

    pub fn set_description(&mut self, text: &str) {
        self.game_description = text.to_string();
    }

    pub fn set_version(&mut self, text: &str) {
        self.game_version = text.to_string();
    }

    pub fn set_protocol_version(&mut self, version: i32) {
        self.protocol_version = version;
    }

    /// Applies `n` only if it does not exceed the real capacity
    ///
    /// Returns whether the value was taken.
    pub fn set_advertised_max_clients(&mut self, n: u32) -> bool {
        if n > self.real_max_clients {
            debug!(
                "Ignoring advertised max clients {} above real capacity {}",
                n, self.real_max_clients
            );
            return false;
        }
        self.advertised_max_clients = n;
        true
    }

    /// Combines the snapshot with live host values into a reply
    ///
    /// Integer fields are cut to the wire widths the same way the host's bit
    /// buffer truncates them.
    pub fn to_reply(&self, host: &dyn HostInfo) -> InfoReply {
        InfoReply {
            protocol: self.protocol_version as u8,
            name: host.host_name(),
            map: host.map_name(),
            folder: self.game_directory.clone(),
            game: self.game_description.clone(),
            app_id: self.app_id as u16,
            players: host.num_clients() as u8,
            max_players: self.advertised_max_clients as u8,
            bots: host.num_bots() as u8,
            server_type: SERVER_TYPE_DEDICATED,
            environment: OS_WINDOWS,
            passworded: host.is_passworded(),
            secured: SECURED != 0,
            version: self.game_version.clone(),
        }
    }
}

/// Final component of a host path, accepting either separator
fn last_path_component(path: &str) -> &str {
    path.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::tests::test_status;
    use crate::host::{HostStatus, StaticHost};
    use proptest::prelude::*;

    #[test]
    fn test_game_dir_stripped_to_last_component() {
        assert_eq!(last_path_component("C:\\srcds\\orangebox\\tf"), "tf");
        assert_eq!(last_path_component("/srv/srcds/cstrike"), "cstrike");
        assert_eq!(last_path_component("hl2mp"), "hl2mp");
        assert_eq!(last_path_component(""), "");
    }

    #[test]
    fn test_initialize_static_reads_host() {
        let host = StaticHost::new(test_status());
        let snapshot = StatusSnapshot::initialize_static(&host);

        assert_eq!(snapshot.game_directory(), "sourcetest");
        assert_eq!(snapshot.game_description(), "Source Test");
        assert_eq!(snapshot.game_version(), DEFAULT_GAME_VERSION);
        assert_eq!(snapshot.protocol_version(), DEFAULT_PROTOCOL_VERSION);
        assert_eq!(snapshot.app_id(), 215);
        assert_eq!(snapshot.real_max_clients(), 32);
        assert_eq!(snapshot.advertised_max_clients(), 32);
        // Static capture does not touch live counters
        assert_eq!(host.live_reads(), 0);
    }

    #[test]
    fn test_empires_description_override() {
        let host = StaticHost::new(HostStatus {
            game_dir: "C:\\srcds\\orangebox\\empires".to_string(),
            game_description: "Empires v2.12".to_string(),
            ..test_status()
        });
        let snapshot = StatusSnapshot::initialize_static(&host);

        assert_eq!(snapshot.game_directory(), "empires");
        assert_eq!(snapshot.game_description(), "Empires v2.24d");
    }

    #[test]
    fn test_advertised_max_clients_bounded() {
        let host = StaticHost::new(test_status());
        let mut snapshot = StatusSnapshot::initialize_static(&host);

        assert!(snapshot.set_advertised_max_clients(16));
        assert_eq!(snapshot.advertised_max_clients(), 16);

        assert!(!snapshot.set_advertised_max_clients(40));
        assert_eq!(snapshot.advertised_max_clients(), 16);

        assert!(snapshot.set_advertised_max_clients(32));
        assert_eq!(snapshot.advertised_max_clients(), 32);
    }

    #[test]
    fn test_overrides_flow_into_reply() {
        let host = StaticHost::new(HostStatus {
            password: Some("secret".to_string()),
            ..test_status()
        });
        let mut snapshot = StatusSnapshot::initialize_static(&host);
        snapshot.set_description("Custom Game");
        snapshot.set_version("2.0.0.1");
        snapshot.set_protocol_version(17);
        snapshot.set_advertised_max_clients(24);

        let reply = snapshot.to_reply(&host);
        assert_eq!(reply.protocol, 17);
        assert_eq!(reply.name, "Test Server");
        assert_eq!(reply.map, "emp_canyon");
        assert_eq!(reply.folder, "sourcetest");
        assert_eq!(reply.game, "Custom Game");
        assert_eq!(reply.app_id, 215);
        assert_eq!(reply.players, 3);
        assert_eq!(reply.max_players, 24);
        assert_eq!(reply.bots, 1);
        assert_eq!(reply.server_type, b'd');
        assert_eq!(reply.environment, b'w');
        assert!(reply.passworded);
        assert!(reply.secured);
        assert_eq!(reply.version, "2.0.0.1");
    }

    proptest! {
        #[test]
        fn prop_advertised_never_exceeds_real(real in 1u32..=255, before in 0u32..=255, n in any::<u32>()) {
            let host = StaticHost::new(HostStatus { max_clients: real, ..test_status() });
            let mut snapshot = StatusSnapshot::initialize_static(&host);
            snapshot.set_advertised_max_clients(before.min(real));
            let previous = snapshot.advertised_max_clients();

            snapshot.set_advertised_max_clients(n);

            let expected = if n <= real { n } else { previous };
            prop_assert_eq!(snapshot.advertised_max_clients(), expected);
            prop_assert!(snapshot.advertised_max_clients() <= snapshot.real_max_clients());
        }
    }
}
