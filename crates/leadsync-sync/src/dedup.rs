use std::collections::HashSet;
use std::sync::Arc;

use leadsync_core::{ExistingContact, NormalizedLead};
use leadsync_storage::{LeadStore, StoreError};

/// Contact identities already present in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KnownContacts {
    emails: HashSet<String>,
    phones: HashSet<String>,
}

impl KnownContacts {
    pub fn from_contacts<'a>(contacts: impl IntoIterator<Item = &'a ExistingContact>) -> Self {
        let mut known = Self::default();
        for contact in contacts {
            if let Some(email) = contact.email.as_deref().filter(|e| !e.is_empty()) {
                known.emails.insert(email.to_lowercase());
            }
            if let Some(phone) = contact.phone.as_deref().filter(|p| !p.is_empty()) {
                known.phones.insert(phone.to_string());
            }
        }
        known
    }

    /// Email decides whenever present; phone is only consulted for email-less leads.
    ///
    /// A lead with an unseen email is new even if its phone belongs to another lead.
    pub fn is_new(&self, lead: &NormalizedLead) -> bool {
        if lead.first_name.is_empty() && lead.phone.is_none() {
            return false;
        }
        match (&lead.email, &lead.phone) {
            (Some(email), _) => !self.emails.contains(&email.to_lowercase()),
            (None, Some(phone)) => !self.phones.contains(phone),
            (None, None) => true,
        }
    }
}

/// Cross-references candidates against stored leads by email and phone.
pub struct DedupEngine {
    store: Arc<dyn LeadStore>,
}

impl DedupEngine {
    pub fn new(store: Arc<dyn LeadStore>) -> Self {
        Self { store }
    }

    pub async fn known_contacts(
        &self,
        candidates: &[NormalizedLead],
    ) -> Result<KnownContacts, StoreError> {
        let emails: Vec<String> = candidates.iter().filter_map(|l| l.email.clone()).collect();
        let phones: Vec<String> = candidates.iter().filter_map(|l| l.phone.clone()).collect();

        let (by_email, by_phone) = tokio::try_join!(
            self.store.find_contacts_by_email(&emails),
            self.store.find_contacts_by_phone(&phones),
        )?;
        Ok(KnownContacts::from_contacts(by_email.iter().chain(by_phone.iter())))
    }

    /// The subset of `candidates` not already stored.
    pub async fn new_leads(
        &self,
        candidates: Vec<NormalizedLead>,
    ) -> Result<Vec<NormalizedLead>, StoreError> {
        let known = self.known_contacts(&candidates).await?;
        Ok(candidates.into_iter().filter(|l| known.is_new(l)).collect())
    }
}
