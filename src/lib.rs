//! A growable hash map that stays cheap to share between threads.
//!
//! Most concurrent hash maps pick one of two extremes. Either every operation takes a global
//! lock (simple, slow under contention), or the whole table is lock-free (fast, and a steady
//! source of subtle bugs). This crate sits deliberately in between: it layers a growable map on
//! top of a *fixed-capacity* open-addressing table in which every element lives inside a small
//! "neighborhood" of slots, in the style of hopscotch hashing. Point operations against a table
//! of fixed capacity only ever touch one neighborhood, so they can be made thread-safe with one
//! small per-neighborhood lock. The only operation that needs more than that is growing the
//! table — and growing is rare.
//!
//! The map therefore runs a two-tier protocol for its shared-access operations ([`put_sync`],
//! [`get_sync`], [`erase_sync`]):
//!
//!  - **Fast path**: take a *shared* lock on the table handle (any number of threads at once),
//!    and let the table's own neighborhood lock serialize the point operation. In the common
//!    case — the table has room — this is all that ever happens, and unrelated operations never
//!    block each other.
//!  - **Slow path**: if the table reports that it has no room in the element's neighborhood,
//!    escalate to an *exclusive* lock, re-try once (another thread may have grown the table
//!    while we waited), and only then allocate a table of twice the capacity, migrate every
//!    entry, and swap it in.
//!
//! Growth is triggered purely by the table signaling placement failure; there is no load-factor
//! threshold. Capacity never shrinks except through [`clear`].
//!
//! # Two API planes
//!
//! The sync-suffixed operations take `&self`, so a map wrapped in an [`Arc`] can be hammered
//! from as many threads as you like. They hand back snapshotted (cloned) values, never live
//! references. Everything else — [`get`], [`insert`], [`erase`], iteration, [`rehash`] — takes
//! `&mut self` and touches **no lock at all**. That split is not a style choice: exclusive
//! access is exactly the precondition under which skipping the locks is sound, and `&mut self`
//! makes the compiler enforce it. If you have the map to yourself, you use the plain methods
//! and pay nothing; if you share it, you use the `_sync` methods and pay one shared-lock
//! acquisition. Mixing the two planes on the same map at the same time is a borrow error, not
//! undefined behavior.
//!
//! ```
//! use sidewalk::HopscotchMap;
//! use std::sync::Arc;
//!
//! let map = Arc::new(HopscotchMap::new());
//! let workers: Vec<_> = (0..4u32)
//!     .map(|t| {
//!         let map = Arc::clone(&map);
//!         std::thread::spawn(move || {
//!             for i in 0..100 {
//!                 map.put_sync(t * 100 + i, i);
//!             }
//!         })
//!     })
//!     .collect();
//! for w in workers {
//!     w.join().unwrap();
//! }
//! assert_eq!(map.len(), 400);
//! assert_eq!(map.get_sync(&7), Some(7));
//! ```
//!
//! # Persistence
//!
//! [`save`] and [`load`] linearize the map to a positional byte stream — length, capacity, then
//! every entry through its [`serde`] implementation — and reconstruct it with the capacity it
//! was saved at. There is no versioning or checksum; read the stream back with the same key and
//! value types you wrote it with.
//!
//! # Why sidewalk?
//!
//! You can't play hopscotch without one.
//!
//! [`put_sync`]: HopscotchMap::put_sync
//! [`get_sync`]: HopscotchMap::get_sync
//! [`erase_sync`]: HopscotchMap::erase_sync
//! [`get`]: HopscotchMap::get
//! [`insert`]: HopscotchMap::insert
//! [`erase`]: HopscotchMap::erase
//! [`rehash`]: HopscotchMap::rehash
//! [`clear`]: HopscotchMap::clear
//! [`save`]: HopscotchMap::save
//! [`load`]: HopscotchMap::load
//! [`Arc`]: std::sync::Arc

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod map;
pub mod raw;

pub use map::{DefaultHashBuilder, HopscotchMap, IntoIter, Iter};
