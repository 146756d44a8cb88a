//! The auth service over the partner identity sheet.
//!
//! Sheet layout, columns A onward: partner code, phone, name, user id,
//! `authorized` / `not authorized`, ISO timestamp. One row per partner
//! contract; a user id appears in at most one row.

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use troika_core::{mask, UserId};
use troika_sheets::{CellUpdate, Row, SheetHandle};

use crate::cache::AuthCache;
use crate::error::{AuthError, AuthResult};
use crate::phone::normalize_phone;

// 0-based column offsets within a row.
const COL_PARTNER_CODE: usize = 0;
const COL_PHONE: usize = 1;
const COL_NAME: usize = 2;
const COL_USER_ID: usize = 3;
const COL_STATUS: usize = 4;

// 1-based column numbers for writes.
const WRITE_COL_USER_ID: u32 = 4;
const WRITE_COL_STATUS: u32 = 5;
const WRITE_COL_TIMESTAMP: u32 = 6;

const STATUS_AUTHORIZED: &str = "authorized";
const STATUS_NOT_AUTHORIZED: &str = "not authorized";

/// One partner identity row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerIdentity {
    /// Partner contract code.
    pub partner_code: String,
    /// Canonical phone.
    pub phone: String,
    /// Contact name as entered in the sheet.
    pub name: String,
    /// Bound messenger user, when authorized.
    pub user_id: Option<UserId>,
    /// Whether the row is marked authorized.
    pub authorized: bool,
}

impl PartnerIdentity {
    fn from_row(row: &Row) -> Self {
        Self {
            partner_code: row.cell(COL_PARTNER_CODE).trim().to_string(),
            phone: row.cell(COL_PHONE).trim().to_string(),
            name: row.cell(COL_NAME).trim().to_string(),
            user_id: UserId::parse_cell(row.cell(COL_USER_ID)),
            authorized: row.cell(COL_STATUS).trim() == STATUS_AUTHORIZED,
        }
    }
}

/// Identity lookup and binding.
pub struct AuthService {
    sheet: SheetHandle,
    cache: AuthCache,
}

impl AuthService {
    /// Service over the given auth-sheet handle and cache.
    #[must_use]
    pub fn new(sheet: SheetHandle, cache: AuthCache) -> Self {
        Self { sheet, cache }
    }

    /// Whether `user` holds a current authorization.
    ///
    /// Served from the cache when fresh; otherwise the sheet is consulted
    /// and the cache refreshed with either answer.
    ///
    /// # Errors
    ///
    /// Propagates sheet failures when a reload was necessary.
    pub async fn is_authorized(
        &self,
        user: UserId,
        cancel: &CancellationToken,
    ) -> AuthResult<bool> {
        if let Some(cached) = self.cache.get_fresh(user).await {
            return Ok(cached);
        }

        let rows = self.sheet.list_rows(cancel).await?;
        let authorized = rows
            .iter()
            .skip(1)
            .map(PartnerIdentity::from_row)
            .any(|identity| identity.user_id == Some(user) && identity.authorized);

        self.cache.put(user, authorized).await;
        Ok(authorized)
    }

    /// Full identity for a bound user, if any.
    ///
    /// # Errors
    ///
    /// Propagates sheet failures.
    pub async fn lookup(
        &self,
        user: UserId,
        cancel: &CancellationToken,
    ) -> AuthResult<Option<PartnerIdentity>> {
        let rows = self.sheet.list_rows(cancel).await?;
        Ok(rows
            .iter()
            .skip(1)
            .map(PartnerIdentity::from_row)
            .find(|identity| identity.user_id == Some(user)))
    }

    /// All currently authorized users, for broadcast fan-out.
    ///
    /// # Errors
    ///
    /// Propagates sheet failures.
    pub async fn list_authorized(&self, cancel: &CancellationToken) -> AuthResult<Vec<UserId>> {
        let rows = self.sheet.list_rows(cancel).await?;
        Ok(rows
            .iter()
            .skip(1)
            .map(PartnerIdentity::from_row)
            .filter(|identity| identity.authorized)
            .filter_map(|identity| identity.user_id)
            .collect())
    }

    /// Bind a messenger user to a partner row after a web-form submission.
    ///
    /// Looks up the row whose partner code and normalized phone match,
    /// writes the user id, authorization mark and timestamp, and warms the
    /// cache. Re-binding the same user to the same row is a no-op.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidPhone`] for unusable phones,
    /// [`AuthError::NotFound`] when no row matches, sheet errors otherwise.
    pub async fn bind(
        &self,
        partner_code: &str,
        phone: &str,
        user: UserId,
        cancel: &CancellationToken,
    ) -> AuthResult<()> {
        let normalized = normalize_phone(phone)?;
        let partner_code = partner_code.trim();

        let rows = self.sheet.list_rows(cancel).await?;
        let matched = rows.iter().skip(1).find(|row| {
            row.cell(COL_PARTNER_CODE).trim() == partner_code
                && normalize_phone(row.cell(COL_PHONE))
                    .map(|p| p == normalized)
                    .unwrap_or(false)
        });

        let Some(row) = matched else {
            warn!(
                partner_code,
                phone = %mask::phone(phone),
                "bind: no matching partner row"
            );
            return Err(AuthError::NotFound);
        };

        let identity = PartnerIdentity::from_row(row);
        if identity.user_id == Some(user) && identity.authorized {
            self.cache.put(user, true).await;
            return Ok(());
        }

        let updates = vec![
            CellUpdate {
                row: row.index,
                col: WRITE_COL_USER_ID,
                value: user.to_string(),
            },
            CellUpdate {
                row: row.index,
                col: WRITE_COL_STATUS,
                value: STATUS_AUTHORIZED.to_string(),
            },
            CellUpdate {
                row: row.index,
                col: WRITE_COL_TIMESTAMP,
                value: Utc::now().to_rfc3339(),
            },
        ];
        self.sheet.batch_update(updates, cancel).await?;
        self.cache.put(user, true).await;

        info!(
            partner_code,
            user = %mask::user_id(user),
            "partner bound"
        );
        Ok(())
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use troika_sheets::{
        ApiError, GatewayConfig, InMemorySheets, SheetEndpoint, SheetsApi, SheetsGateway,
    };

    const SHEET: &str = "Partners";

    fn header() -> Vec<String> {
        ["code", "phone", "name", "user", "status", "when"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn seeded_api() -> Arc<InMemorySheets> {
        let api = Arc::new(InMemorySheets::new());
        api.seed(
            SHEET,
            vec![
                header(),
                vec![
                    "P1".into(),
                    "89101234567".into(),
                    "Ivanov I.I.".into(),
                    String::new(),
                    STATUS_NOT_AUTHORIZED.into(),
                    String::new(),
                ],
                vec![
                    "P2".into(),
                    "89991112233".into(),
                    "Petrov P.P.".into(),
                    "555".into(),
                    STATUS_AUTHORIZED.into(),
                    "2026-01-01T00:00:00Z".into(),
                ],
            ],
        );
        api
    }

    fn service_over(api: Arc<InMemorySheets>) -> AuthService {
        let connector_api = Arc::clone(&api);
        let handle = SheetsGateway::new(GatewayConfig::default()).sheet(
            SheetEndpoint::Auth,
            SHEET,
            Arc::new(move || Ok(Arc::clone(&connector_api) as Arc<dyn SheetsApi>)),
        );
        AuthService::new(handle, AuthCache::in_memory())
    }

    #[tokio::test]
    async fn bind_writes_identity_and_authorizes() {
        let api = seeded_api();
        let service = service_over(Arc::clone(&api));
        let cancel = CancellationToken::new();

        service
            .bind("P1", "+7 910 123-45-67", UserId(111_222_333), &cancel)
            .await
            .unwrap();

        let rows = api.rows_of(SHEET);
        assert_eq!(rows[1][3], "111222333");
        assert_eq!(rows[1][4], STATUS_AUTHORIZED);
        assert!(!rows[1][5].is_empty());

        assert!(service
            .is_authorized(UserId(111_222_333), &cancel)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn bind_is_idempotent() {
        let api = seeded_api();
        let service = service_over(Arc::clone(&api));
        let cancel = CancellationToken::new();

        service
            .bind("P1", "89101234567", UserId(111), &cancel)
            .await
            .unwrap();
        let writes_after_first = api.call_count();

        service
            .bind("P1", "89101234567", UserId(111), &cancel)
            .await
            .unwrap();

        // Second bind only re-lists; no mutation happens.
        assert_eq!(api.call_count(), writes_after_first.saturating_add(1));
    }

    #[tokio::test]
    async fn bind_unknown_partner_not_found() {
        let service = service_over(seeded_api());
        let err = service
            .bind("NOPE", "89101234567", UserId(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotFound));
    }

    #[tokio::test]
    async fn bind_phone_mismatch_not_found() {
        let service = service_over(seeded_api());
        let err = service
            .bind("P1", "89100000000", UserId(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::NotFound));
    }

    #[tokio::test]
    async fn bind_rejects_bad_phone_without_touching_sheet() {
        let api = seeded_api();
        let service = service_over(Arc::clone(&api));
        let err = service
            .bind("P1", "123", UserId(1), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidPhone(_)));
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn is_authorized_reads_sheet_on_cache_miss() {
        let api = seeded_api();
        let service = service_over(Arc::clone(&api));
        let cancel = CancellationToken::new();

        assert!(service.is_authorized(UserId(555), &cancel).await.unwrap());
        assert!(!service.is_authorized(UserId(999), &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn cache_hit_avoids_sheet_read() {
        let api = seeded_api();
        let service = service_over(Arc::clone(&api));
        let cancel = CancellationToken::new();

        service.is_authorized(UserId(555), &cancel).await.unwrap();
        let calls = api.call_count();
        service.is_authorized(UserId(555), &cancel).await.unwrap();
        assert_eq!(api.call_count(), calls);
    }

    #[tokio::test]
    async fn expired_cache_entry_reloads() {
        let api = seeded_api();
        let connector_api = Arc::clone(&api);
        let handle = SheetsGateway::new(GatewayConfig::default()).sheet(
            SheetEndpoint::Auth,
            SHEET,
            Arc::new(move || Ok(Arc::clone(&connector_api) as Arc<dyn SheetsApi>)),
        );
        let cache = AuthCache::in_memory();
        cache
            .put_with_timestamp(
                UserId(555),
                false,
                Utc::now() - chrono::Duration::hours(25),
            )
            .await;
        let service = AuthService::new(handle, cache);

        // Stale `false` is ignored; the sheet says authorized.
        assert!(service
            .is_authorized(UserId(555), &CancellationToken::new())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn sheet_failure_surfaces_when_cache_cold() {
        let api = seeded_api();
        api.fail_next(10, ApiError::Invalid("broken".into()));
        let service = service_over(Arc::clone(&api));

        let err = service
            .is_authorized(UserId(555), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Sheet(_)));
    }

    #[tokio::test]
    async fn lookup_returns_identity() {
        let service = service_over(seeded_api());
        let identity = service
            .lookup(UserId(555), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(identity.partner_code, "P2");
        assert_eq!(identity.name, "Petrov P.P.");
        assert!(identity.authorized);
    }

    #[tokio::test]
    async fn list_authorized_returns_bound_users() {
        let api = seeded_api();
        let service = service_over(Arc::clone(&api));
        let cancel = CancellationToken::new();

        assert_eq!(
            service.list_authorized(&cancel).await.unwrap(),
            vec![UserId(555)]
        );

        service
            .bind("P1", "89101234567", UserId(111), &cancel)
            .await
            .unwrap();
        let mut audience = service.list_authorized(&cancel).await.unwrap();
        audience.sort();
        assert_eq!(audience, vec![UserId(111), UserId(555)]);
    }
}
