//! Terminal output for the depot CLI
//!
//! Status lines, spinners and prompts go to stderr so that artifact bytes,
//! paths and listings on stdout stay pipeable. Interactive terminals get
//! `cliclack` rendering; CI and redirected output get plain tagged lines.
//!
//! ```rust,ignore
//! use depot::ui::{self, UiContext, TaskSpinner};
//!
//! let ctx = UiContext::detect();
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Mirroring bundle:B:2.0...");
//! spinner.stop("Mirrored bundle:B:2.0");
//! ui::step_warn_hint(&ctx, "2 orphan files", "Run: depot verify --repair");
//! ```

mod context;
mod output;
mod progress;
mod prompts;
mod theme;

pub use context::UiContext;
pub use output::{
    intro, key_value, outro_success, outro_warn, remark, step_error_detail, step_info, step_ok,
    step_ok_detail, step_warn, step_warn_hint,
};
pub use progress::{FetchMark, FetchProgress, TaskSpinner};
pub use prompts::confirm;
pub use theme::{init_theme, DepotTheme};
