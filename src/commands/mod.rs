/*
 * Copyright (c) 2024 Pascal Bach
 *
 * SPDX-License-Identifier:     MIT
 */

pub mod helpers;

mod checkout;
pub use self::checkout::checkout;

mod cleanup;
pub use self::cleanup::cleanup;

mod clone;
pub use self::clone::clone;

mod delete;
pub use self::delete::delete_mirrors;

mod fetch;
pub use self::fetch::fetch;

mod lfs_fetch;
pub use self::lfs_fetch::lfs_fetch;

mod lfs_pull;
pub use self::lfs_pull::lfs_pull;

mod ls_remote;
pub use self::ls_remote::ls_remote;

mod pull;
pub use self::pull::pull;

mod remote_add;
pub use self::remote_add::remote_add;

mod submodule_init;
pub use self::submodule_init::submodule_init;

mod submodule_update;
pub use self::submodule_update::submodule_update;

mod update_all;
pub use self::update_all::update_all_mirrors;
