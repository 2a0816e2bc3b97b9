/*!
Utilitaires communs aux tests du relais
*/

use std::net::TcpListener;

/// Initialise le logging pour les tests (idempotent)
pub fn init_test_logging() {
    env_logger::builder().is_test(true).try_init().ok();
}

/// Port TCP local libre au moment de l'appel (personne n'écoute dessus)
pub fn free_local_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .unwrap_or(1)
}
