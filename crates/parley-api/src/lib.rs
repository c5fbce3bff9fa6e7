pub mod error;
pub mod identity;
pub mod messages;
pub mod users;

use std::sync::Arc;

use parley_db::Database;
use parley_gateway::presence::Presence;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub presence: Presence,
}
