use crate::document::Patch;
use crate::limits::*;
use crate::model::EventId;
use crate::store::StoreError;

pub(crate) fn validate_event_id(id: &EventId) -> Result<(), StoreError> {
    if id.as_str().is_empty() {
        return Err(StoreError::InvalidPath("empty event id".into()));
    }
    if id.as_str().len() > MAX_EVENT_ID_LEN {
        return Err(StoreError::LimitExceeded("event id too long"));
    }
    Ok(())
}

pub(crate) fn validate_patches(patches: &[Patch]) -> Result<(), StoreError> {
    if patches.len() > MAX_PATCHES_PER_UPDATE {
        return Err(StoreError::LimitExceeded("too many patches in one update"));
    }
    for patch in patches {
        let path = &patch.path;
        if path.is_empty() {
            return Err(StoreError::InvalidPath("empty path".into()));
        }
        if path.len() > MAX_PATH_DEPTH {
            return Err(StoreError::LimitExceeded("field path too deep"));
        }
        if path.segments().iter().any(String::is_empty) {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
    }
    Ok(())
}
