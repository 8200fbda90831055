/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

macro_rules! unwrap_or_log {
    ($expr:expr) => {{
        use tracing::error;
        match $expr {
            Ok(v) => v,
            Err(error) => {
                error!(?error);
                return Err(error.into());
            }
        }
    }};
}

use std::io::Read;

use crate::{ControlError, ControlResult};

/// Extracts the first entry of a zipped `GenICam` XML payload.
pub(crate) fn unzip_genxml(zipped: Vec<u8>) -> ControlResult<Vec<u8>> {
    fn zip_err(err: impl std::fmt::Debug) -> ControlError {
        ControlError::InvalidData(format!("zipped xml file is broken: {:?}", err).into())
    }

    let mut zip = zip::ZipArchive::new(std::io::Cursor::new(zipped)).map_err(zip_err)?;
    if zip.len() == 0 {
        return Err(zip_err("no file in zipped GenApi XML"));
    }
    let mut file = zip.by_index(0).map_err(zip_err)?;
    let mut xml = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut xml).map_err(zip_err)?;
    Ok(xml)
}
