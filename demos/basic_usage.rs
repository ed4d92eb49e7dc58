//! Basic usage of the cached database layer.

use keyed_cache::config::CachesConfig;
use keyed_cache::db::{InMemoryDatabase, NewSignup};
use keyed_cache::model::{Account, Block};
use keyed_cache::{RequestContext, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .try_init()
        .ok();

    println!("\n=== Keyed Cache - Basic Example ===\n");

    // 1. Wire caches and repositories over in-memory tables
    println!("1. Initializing in-memory database...");
    let db = InMemoryDatabase::in_memory(&CachesConfig::default(), "example.org")?;
    let sweeper = db.caches().spawn_sweeper();
    let ctx = RequestContext::new();
    println!("   ✓ Database ready, sweeper running\n");

    // 2. Sign up a user; the new rows land in the caches as they are written
    println!("2. Signing up alice:");
    let alice = db
        .admin
        .new_signup(
            &ctx,
            NewSignup {
                username: "alice".to_string(),
                email: "alice@example.org".to_string(),
                locale: "en".to_string(),
                ..Default::default()
            },
        )
        .await?;
    println!("   ✓ User {} awaiting confirmation\n", alice.id);

    // 3. Confirm the email through the token key
    println!("3. Confirming email:");
    let token = alice.confirmation_token.clone().unwrap_or_default();
    let alice = db.users.confirm_email(&ctx, &token).await?;
    println!(
        "   ✓ Confirmed {} ({} storage reads so far)\n",
        alice.email.as_deref().unwrap_or_default(),
        db.users.storage().selects()
    );

    // 4. Any natural key now hits the cache
    println!("4. Looking alice up by email:");
    let by_email = db
        .users
        .get_user_by_email_address(&ctx, "alice@example.org")
        .await?;
    println!(
        "   ✓ Found {} via @{} ({} storage reads)\n",
        by_email.id,
        by_email.account.map(|a| a.username).unwrap_or_default(),
        db.users.storage().selects()
    );

    // 5. Blocks reset cached visibility decisions
    println!("5. Visibility before and after a block:");
    db.accounts
        .put_account(&ctx, &Account::remote("R1", "mallory", "remote.example"))
        .await?;
    let visible = db.visibility.account_visible(&ctx, "R1", &alice.account_id).await?;
    println!("   - mallory sees alice: {}", visible);

    let block = Block::new(
        "B1",
        "https://example.org/blocks/B1",
        &alice.account_id,
        "R1",
    );
    db.blocks.put_block(&ctx, &block).await?;
    let visible = db.visibility.account_visible(&ctx, "R1", &alice.account_id).await?;
    println!("   ✓ after alice blocks mallory: {}\n", visible);

    // 6. Cache statistics
    println!("6. User cache stats:");
    let stats = db.caches().user.stats();
    println!(
        "   entries={} hits={} misses={} stores={}",
        stats.entries, stats.hits, stats.misses, stats.stores
    );

    sweeper.stop();
    println!("\n=== Example Complete ===\n");
    Ok(())
}
