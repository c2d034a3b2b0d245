use singleton_provider::{ConstructionError, InitConfig, InstanceRegistry, PoisonPolicy};

fn connect(fail: bool) -> Result<String, String> {
   println!("Connecting (fail={fail})...");
   if fail {
      Err("connection refused".to_string())
   } else {
      Ok("postgres://db:5432".to_string())
   }
}

fn main() {
   // Default policy: one failure poisons the key for good.
   let strict = InstanceRegistry::new();
   match strict.get("database", || connect(true)) {
      Ok(_) => panic!("Should have failed"),
      Err(err) => println!("Caught error: {err}"),
   }
   match strict.get("database", || connect(false)) {
      Err(ConstructionError::PoisonedState) => println!("Key stays poisoned"),
      other => panic!("expected PoisonedState, got {other:?}"),
   }

   // Retry policy: the next caller gets another attempt.
   let lenient = InstanceRegistry::with_config(InitConfig::default().with_policy(PoisonPolicy::Retry));
   assert!(lenient.get("database", || connect(true)).is_err());
   let url = lenient.get("database", || connect(false)).unwrap();
   println!("Got connection: {url}");

   // Once published, the constructor is never consulted again.
   let again = lenient.get("database", || connect(true)).unwrap();
   assert_eq!(url, again);

   // A panicking constructor is reported, not propagated.
   let panicked = strict.get_or_init::<u32, _>("port", || panic!("port file unreadable"));
   println!("Panic surfaced as: {}", panicked.unwrap_err());
}
