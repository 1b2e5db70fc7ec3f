use crate::error::{NotesError, Result};
use crate::host::{Handle, Routine, Session, Value};
use crate::ident::Identifier;
use crate::policy::{self, Attribute};
use once_cell::unsync::OnceCell;

/// A folder of one account.
#[derive(Clone)]
pub struct Folder<'a> {
    session: &'a Session,
    handle: Handle,
    account: String,
    id: OnceCell<Identifier>,
}

impl<'a> Folder<'a> {
    pub fn new(session: &'a Session, handle: Handle, account: &str) -> Self {
        Self {
            session,
            handle,
            account: account.to_string(),
            id: OnceCell::new(),
        }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn id(&self) -> Result<Identifier> {
        if let Some(id) = self.id.get() {
            return Ok(id.clone());
        }
        let id = policy::read(self.session, &self.handle, Attribute::FolderId, &policy::no_args)?
            .into_text()
            .map(Identifier::new)
            .unwrap_or_else(Identifier::invalid);
        if id.is_valid() {
            let _ = self.id.set(id.clone());
        }
        Ok(id)
    }

    fn legacy_key(&self) -> Result<Vec<Value>> {
        let id = self.id()?;
        if !id.is_valid() {
            return Err(NotesError::lookup("folder", self.handle.token()));
        }
        Ok(vec![
            Value::from(self.account.as_str()),
            Value::from(id.as_str()),
        ])
    }

    pub fn name(&self) -> Result<String> {
        Ok(
            policy::read(self.session, &self.handle, Attribute::FolderName, &|| {
                self.legacy_key()
            })?
            .into_text()
            .unwrap_or_default(),
        )
    }

    /// Reveal the folder in the Notes window.
    pub fn show(&self) -> Result<()> {
        self.session.call(Routine::FolderShow, &self.legacy_key()?)?;
        Ok(())
    }
}

impl std::fmt::Debug for Folder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Folder")
            .field("handle", &self.handle)
            .field("account", &self.account)
            .field("id", &self.id.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::fixtures::HostFixture;
    use crate::host::Property;

    #[test]
    fn name_falls_back_to_legacy() {
        let fx = HostFixture::shopping().with_quirks(|q| {
            q.absent.insert(Property::Name);
        });
        let folder_handle = fx.host.add_folder(&fx.account, "Archive");
        let session = fx.host.session();
        let folder = Folder::new(&session, folder_handle, "iCloud");
        assert_eq!(folder.name().unwrap(), "Archive");
        assert_eq!(fx.host.calls_to(Routine::FolderGetName), 1);
    }

    #[test]
    fn id_is_memoized() {
        let fx = HostFixture::shopping();
        let folder_handle = fx.host.add_folder(&fx.account, "Archive");
        let session = fx.host.session();
        let folder = Folder::new(&session, folder_handle.clone(), "iCloud");
        assert_eq!(folder.id().unwrap().as_str(), fx.host.id_of(&folder_handle));
        assert_eq!(folder.id().unwrap(), folder.id().unwrap());
    }

    #[test]
    fn show_uses_legacy() {
        let fx = HostFixture::shopping();
        let folder_handle = fx.host.add_folder(&fx.account, "Archive");
        let session = fx.host.session();
        Folder::new(&session, folder_handle, "iCloud").show().unwrap();
        assert_eq!(fx.host.legacy_calls(), vec![Routine::FolderShow]);
    }
}
