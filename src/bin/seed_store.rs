use entity_api::error::{EntityApiErrorKind, Error as StoreError};
use entity_api::Store;
use log::{error, info};
use service::{config::Config, logging::Logger};

const DEMO_PASSWORD: &str = "password";
const DEMO_USERS: &[&str] = &["alice@example.com", "bob@example.com", "carol@example.com"];

fn main() {
    let config = Config::new();
    Logger::init_logger(&config);

    let Some(path) = config.store_path() else {
        error!("Seeding needs a store path; set --store-path or STORE_PATH");
        std::process::exit(1);
    };
    info!("Seeding user store [{}]...", path.display());

    let mut store = match service::init_store(&config) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to open the user store: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = seed_store(store.as_mut()) {
        error!("Seeding failed: {e}");
        std::process::exit(1);
    }
}

/// Registers and verifies the demo users, and makes the first two buddies.
/// Users that already exist are left as they are.
fn seed_store(store: &mut dyn Store) -> Result<(), StoreError> {
    for email in DEMO_USERS {
        match store.add_user(email, DEMO_PASSWORD) {
            Ok(()) => {
                let token = store.get_user_info(email)?.verify_token;
                store.verify_user(email, &token)?;
                info!("Registered {email}");
            }
            Err(e) if e.error_kind == EntityApiErrorKind::EmailTaken => {
                info!("{email} already exists, skipping");
            }
            Err(e) => return Err(e),
        }
    }

    let (alice, bob) = (DEMO_USERS[0], DEMO_USERS[1]);
    if store.get_user_info(alice)?.is_related_to(bob) {
        return Ok(());
    }
    store.send_request(alice, bob)?;
    store.accept_request(bob, alice)?;
    info!("{alice} and {bob} are now buddies");
    Ok(())
}
