// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::flexi_logger::Logger;
use ::std::sync::Once;

//==============================================================================
// Static Variables
//==============================================================================

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

//==============================================================================
// Standalone Functions
//==============================================================================

/// Initializes logging features.
pub fn initialize() {
    INIT_LOG.call_once(|| {
        // Configured based on RUST_LOG env var. A second logger (e.g. installed by the host) is not an error.
        match Logger::try_with_env_or_str("") {
            Ok(logger) => {
                if let Err(e) = logger.start() {
                    eprintln!("logging::initialize(): failed to start logger ({:?})", e);
                }
            },
            Err(e) => eprintln!("logging::initialize(): bad log specification ({:?})", e),
        }
    });
}
