/*!
# Symbion Relay DevKit - Fixtures et serveurs simulés pour tests

Bibliothèque facilitant les tests du relais de télémétrie avec:
- Constructeurs d'arbres de capteurs au format `data.json`
- Afficheur simulé (page signature + endpoint `/update`)
- Moniteur matériel simulé servant un arbre fixe
- Utilitaires ports et logging
*/

pub mod mock_monitor;
pub mod mock_sink;
pub mod sensor_tree;
pub mod test_utils;

pub use mock_monitor::MockMonitor;
pub use mock_sink::MockSink;
pub use test_utils::{free_local_port, init_test_logging};
