// SPDX-License-Identifier: MIT OR Apache-2.0
//! Default bucket presets named in spec §5.

use crate::bucket::BucketConfig;

/// Upload routes: 30/min.
pub const UPLOAD: BucketConfig = BucketConfig::per_minute(30);
/// Generation submission: 20/min.
pub const GENERATION: BucketConfig = BucketConfig::per_minute(20);
/// Training submission: 5/min.
pub const TRAINING: BucketConfig = BucketConfig::per_minute(5);
/// Everything else not named above: 100/min.
pub const DEFAULT: BucketConfig = BucketConfig::per_minute(100);
