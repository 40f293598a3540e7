use crate::sql::base::dialect::TimeoutDialect;

// Legacy timeout table.
const COL_ID: &str = "Id";
const COL_DESTINATION: &str = "Destination";
const COL_SAGA_ID: &str = "SagaId";
const COL_STATE: &str = "State";
const COL_TIME: &str = "Time";
const COL_HEADERS: &str = "Headers";
const COL_OWNER: &str = "OwningTimeoutManager";

// Run bookkeeping.
const COL_RUN_TOKEN: &str = "RunToken";
const COL_ENDPOINT_NAME: &str = "EndpointName";
const COL_STATUS: &str = "Status";
const COL_CUTOFF: &str = "Cutoff";
const COL_RUN_PARAMETERS: &str = "RunParameters";
const COL_NUMBER_OF_BATCHES: &str = "NumberOfBatches";
const COL_STARTED_AT: &str = "StartedAt";
const COL_COMPLETED_AT: &str = "CompletedAt";

// Batch membership.
const COL_BATCH_NUMBER: &str = "BatchNumber";
const COL_TIMEOUT_ID: &str = "TimeoutId";
const COL_BATCH_STATE: &str = "BatchState";

// Delayed delivery and staging.
const COL_MESSAGE_ID: &str = "MessageId";
const COL_BODY: &str = "Body";
const COL_DUE: &str = "Due";
const COL_ENDPOINT: &str = "Endpoint";
const COL_PROMOTED: &str = "Promoted";

const MESSAGE_COLUMNS: [&str; 5] = [COL_MESSAGE_ID, COL_DESTINATION, COL_HEADERS, COL_BODY, COL_DUE];

/// Run table columns, in the order of [`QueryGenerator::insert_run`] bindings.
pub const RUN_COLUMNS: [&str; 8] = [
    COL_RUN_TOKEN,
    COL_ENDPOINT_NAME,
    COL_STATUS,
    COL_CUTOFF,
    COL_RUN_PARAMETERS,
    COL_NUMBER_OF_BATCHES,
    COL_STARTED_AT,
    COL_COMPLETED_AT,
];

/// Columns returned by [`QueryGenerator::read_batch`], in order.
pub const TIMEOUT_COLUMNS: [&str; 7] = [
    COL_ID,
    COL_DESTINATION,
    COL_SAGA_ID,
    COL_TIME,
    COL_HEADERS,
    COL_STATE,
    COL_OWNER,
];

/// Renders every statement the SQL backends run, for one dialect.
///
/// Placeholders are numbered in the order the caller must bind parameters.
pub struct QueryGenerator<'a> {
    dialect: &'a dyn TimeoutDialect,
}

impl<'a> QueryGenerator<'a> {
    pub fn new(dialect: &'a dyn TimeoutDialect) -> Self {
        Self { dialect }
    }

    fn q(&self, ident: &str) -> String {
        self.dialect.quote_identifier(ident)
    }

    /// `alias.ident`, quoted.
    fn qa(&self, alias: &str, ident: &str) -> String {
        format!("{alias}.{}", self.q(ident))
    }

    fn p(&self, index: usize) -> String {
        self.dialect.get_placeholder(index)
    }

    fn column_list(&self, columns: &[&str]) -> String {
        columns
            .iter()
            .map(|c| self.q(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn values_rows(&self, rows: usize, width: usize) -> String {
        (0..rows)
            .map(|row| {
                let row = (0..width)
                    .map(|col| self.p(row * width + col))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("({row})")
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn table_exists(&self) -> String {
        self.dialect.table_exists_sql()
    }

    pub fn count_rows(&self, table: &str) -> String {
        format!("SELECT COUNT(*) FROM {}", self.q(table))
    }

    pub fn delete_all(&self, table: &str) -> String {
        format!("DELETE FROM {}", self.q(table))
    }

    pub fn drop_table(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", self.q(table))
    }

    // ---- source ----

    /// Schema of the legacy timeout table, for provisioning test stores.
    pub fn create_timeouts_table(&self, timeouts: &str) -> String {
        let d = self.dialect;
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({} {} NOT NULL PRIMARY KEY, {} {} NOT NULL, {} {} NULL, \
             {} {} NOT NULL, {} {} NULL, {} {} NULL, {} {} NOT NULL)",
            self.q(timeouts),
            self.q(COL_ID),
            d.key_type(),
            self.q(COL_DESTINATION),
            d.key_type(),
            self.q(COL_SAGA_ID),
            d.key_type(),
            self.q(COL_TIME),
            d.timestamp_type(),
            self.q(COL_HEADERS),
            d.text_type(),
            self.q(COL_STATE),
            d.binary_type(),
            self.q(COL_OWNER),
            d.key_type(),
        )
    }

    /// Binds: id, destination, saga id, time, headers, state, owner.
    pub fn insert_timeout(&self, timeouts: &str) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.q(timeouts),
            self.column_list(&TIMEOUT_COLUMNS),
            self.values_rows(1, TIMEOUT_COLUMNS.len())
        )
    }

    pub fn create_run_table(&self, runs: &str) -> String {
        let d = self.dialect;
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({} {} NOT NULL PRIMARY KEY, {} {} NOT NULL, {} {} NOT NULL, \
             {} {} NOT NULL, {} {} NOT NULL, {} {} NOT NULL, {} {} NOT NULL, {} {} NULL)",
            self.q(runs),
            self.q(COL_RUN_TOKEN),
            d.key_type(),
            self.q(COL_ENDPOINT_NAME),
            d.key_type(),
            self.q(COL_STATUS),
            d.bigint_type(),
            self.q(COL_CUTOFF),
            d.timestamp_type(),
            self.q(COL_RUN_PARAMETERS),
            d.text_type(),
            self.q(COL_NUMBER_OF_BATCHES),
            d.bigint_type(),
            self.q(COL_STARTED_AT),
            d.timestamp_type(),
            self.q(COL_COMPLETED_AT),
            d.timestamp_type(),
        )
    }

    pub fn create_batch_table(&self, batches: &str) -> String {
        let d = self.dialect;
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({} {} NOT NULL, {} {} NOT NULL, {} {} NOT NULL, \
             PRIMARY KEY ({}, {}), UNIQUE ({}))",
            self.q(batches),
            self.q(COL_BATCH_NUMBER),
            d.bigint_type(),
            self.q(COL_TIMEOUT_ID),
            d.key_type(),
            self.q(COL_BATCH_STATE),
            d.bigint_type(),
            self.q(COL_BATCH_NUMBER),
            self.q(COL_TIMEOUT_ID),
            self.q(COL_TIMEOUT_ID),
        )
    }

    /// Runs whose status code is in `statuses`. Columns follow the run table order.
    pub fn select_runs_with_status(&self, runs: &str, statuses: &[i64]) -> String {
        let codes = statuses
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "SELECT {} FROM {} WHERE {} IN ({codes})",
            self.column_list(&RUN_COLUMNS),
            self.q(runs),
            self.q(COL_STATUS),
        )
    }

    /// Binds: token, endpoint, status, cutoff, parameters, batches, started, completed.
    pub fn insert_run(&self, runs: &str) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.q(runs),
            self.column_list(&RUN_COLUMNS),
            self.values_rows(1, RUN_COLUMNS.len())
        )
    }

    /// Binds: status, number of batches, completed at, token.
    pub fn update_run(&self, runs: &str) -> String {
        format!(
            "UPDATE {} SET {} = {}, {} = {}, {} = {} WHERE {} = {}",
            self.q(runs),
            self.q(COL_STATUS),
            self.p(0),
            self.q(COL_NUMBER_OF_BATCHES),
            self.p(1),
            self.q(COL_COMPLETED_AT),
            self.p(2),
            self.q(COL_RUN_TOKEN),
            self.p(3),
        )
    }

    /// Binds: token.
    pub fn delete_run(&self, runs: &str) -> String {
        format!(
            "DELETE FROM {} WHERE {} = {}",
            self.q(runs),
            self.q(COL_RUN_TOKEN),
            self.p(0)
        )
    }

    /// Owner, destination, count, min and max due time per group. Binds: cutoff.
    pub fn endpoint_summary(&self, timeouts: &str) -> String {
        let owner = self.q(COL_OWNER);
        let destination = self.q(COL_DESTINATION);
        let time = self.q(COL_TIME);
        format!(
            "SELECT {owner}, {destination}, COUNT(*), MIN({time}), MAX({time}) FROM {} \
             WHERE {time} >= {} GROUP BY {owner}, {destination}",
            self.q(timeouts),
            self.p(0),
        )
    }

    /// Next page of timeout ids eligible for a run, in id order.
    ///
    /// Binds: endpoint name, hidden owner of this run, cutoff, last seen id.
    pub fn eligible_page(&self, timeouts: &str, batches: &str, limit: usize) -> String {
        let id = self.qa("t", COL_ID);
        let owner = self.qa("t", COL_OWNER);
        format!(
            "SELECT {id} FROM {} t WHERE ({owner} = {} OR {owner} = {}) AND {} >= {} AND {id} > {} \
             AND NOT EXISTS (SELECT 1 FROM {} b WHERE {} = {id}) ORDER BY {id} LIMIT {limit}",
            self.q(timeouts),
            self.p(0),
            self.p(1),
            self.qa("t", COL_TIME),
            self.p(2),
            self.p(3),
            self.q(batches),
            self.qa("b", COL_TIMEOUT_ID),
        )
    }

    pub fn max_batch_number(&self, batches: &str) -> String {
        format!(
            "SELECT COALESCE(MAX({}), 0) FROM {}",
            self.q(COL_BATCH_NUMBER),
            self.q(batches)
        )
    }

    /// Binds `rows` triples of batch number, timeout id, batch state.
    pub fn insert_batch_members(&self, batches: &str, rows: usize) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.q(batches),
            self.column_list(&[COL_BATCH_NUMBER, COL_TIMEOUT_ID, COL_BATCH_STATE]),
            self.values_rows(rows, 3)
        )
    }

    fn batch_members(&self, batches: &str, placeholder: usize) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = {}",
            self.q(COL_TIMEOUT_ID),
            self.q(batches),
            self.q(COL_BATCH_NUMBER),
            self.p(placeholder)
        )
    }

    /// Binds: hidden owner, batch number.
    pub fn hide_batch(&self, timeouts: &str, batches: &str) -> String {
        format!(
            "UPDATE {} SET {} = {} WHERE {} IN ({})",
            self.q(timeouts),
            self.q(COL_OWNER),
            self.p(0),
            self.q(COL_ID),
            self.batch_members(batches, 1)
        )
    }

    /// Number, state and size of every batch, by number.
    pub fn batch_summary(&self, batches: &str) -> String {
        let number = self.q(COL_BATCH_NUMBER);
        let state = self.q(COL_BATCH_STATE);
        format!(
            "SELECT {number}, {state}, COUNT(*) FROM {} GROUP BY {number}, {state} ORDER BY {number}",
            self.q(batches)
        )
    }

    /// Binds: batch number.
    pub fn batch_state(&self, batches: &str) -> String {
        format!(
            "SELECT {}, COUNT(*) FROM {} WHERE {} = {} GROUP BY {}",
            self.q(COL_BATCH_STATE),
            self.q(batches),
            self.q(COL_BATCH_NUMBER),
            self.p(0),
            self.q(COL_BATCH_STATE),
        )
    }

    /// Columns as in [`TIMEOUT_COLUMNS`]. Binds: batch number.
    pub fn read_batch(&self, timeouts: &str, batches: &str) -> String {
        let columns = TIMEOUT_COLUMNS
            .iter()
            .map(|c| self.qa("t", c))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "SELECT {columns} FROM {} t INNER JOIN {} b ON {} = {} WHERE {} = {} ORDER BY {}",
            self.q(timeouts),
            self.q(batches),
            self.qa("b", COL_TIMEOUT_ID),
            self.qa("t", COL_ID),
            self.qa("b", COL_BATCH_NUMBER),
            self.p(0),
            self.qa("t", COL_ID),
        )
    }

    /// Binds: state code, batch number.
    pub fn update_batch_state(&self, batches: &str) -> String {
        format!(
            "UPDATE {} SET {} = {} WHERE {} = {}",
            self.q(batches),
            self.q(COL_BATCH_STATE),
            self.p(0),
            self.q(COL_BATCH_NUMBER),
            self.p(1)
        )
    }

    /// Binds: batch number.
    pub fn delete_batch_timeouts(&self, timeouts: &str, batches: &str) -> String {
        format!(
            "DELETE FROM {} WHERE {} IN ({})",
            self.q(timeouts),
            self.q(COL_ID),
            self.batch_members(batches, 0)
        )
    }

    /// Swaps the hidden prefix of a batch's owners for `migrated_prefix`.
    ///
    /// Binds: migrated prefix, batch number.
    pub fn tag_batch_timeouts(&self, timeouts: &str, batches: &str, hidden_len: usize) -> String {
        let owner = self.q(COL_OWNER);
        let endpoint = self.dialect.substring_from(&owner, hidden_len + 1);
        format!(
            "UPDATE {} SET {owner} = {} WHERE {} IN ({})",
            self.q(timeouts),
            self.dialect.concat(&self.p(0), &endpoint),
            self.q(COL_ID),
            self.batch_members(batches, 1)
        )
    }

    /// Strips the hidden prefix from every owner carrying it. Binds: hidden prefix.
    pub fn restore_hidden(&self, timeouts: &str, hidden_len: usize) -> String {
        let owner = self.q(COL_OWNER);
        format!(
            "UPDATE {} SET {owner} = {} WHERE LEFT({owner}, {hidden_len}) = {}",
            self.q(timeouts),
            self.dialect.substring_from(&owner, hidden_len + 1),
            self.p(0)
        )
    }

    // ---- target ----

    /// Delayed-delivery and staging tables share one layout.
    pub fn create_message_table(&self, table: &str) -> String {
        let d = self.dialect;
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({} {} NOT NULL PRIMARY KEY, {} {} NOT NULL, {} {} NOT NULL, \
             {} {} NULL, {} {} NOT NULL)",
            self.q(table),
            self.q(COL_MESSAGE_ID),
            d.key_type(),
            self.q(COL_DESTINATION),
            d.key_type(),
            self.q(COL_HEADERS),
            d.text_type(),
            self.q(COL_BODY),
            d.binary_type(),
            self.q(COL_DUE),
            d.timestamp_type(),
        )
    }

    pub fn create_promotions_table(&self, promotions: &str) -> String {
        let d = self.dialect;
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({} {} NOT NULL, {} {} NOT NULL, {} {} NOT NULL, \
             PRIMARY KEY ({}, {}))",
            self.q(promotions),
            self.q(COL_ENDPOINT),
            d.key_type(),
            self.q(COL_BATCH_NUMBER),
            d.bigint_type(),
            self.q(COL_PROMOTED),
            d.bigint_type(),
            self.q(COL_ENDPOINT),
            self.q(COL_BATCH_NUMBER),
        )
    }

    /// Binds `rows` groups of message id, destination, headers, body, due.
    pub fn insert_messages(&self, table: &str, rows: usize) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.q(table),
            self.column_list(&MESSAGE_COLUMNS),
            self.values_rows(rows, MESSAGE_COLUMNS.len())
        )
    }

    pub fn select_messages(&self, table: &str) -> String {
        format!(
            "SELECT {} FROM {} ORDER BY {}, {}",
            self.column_list(&MESSAGE_COLUMNS),
            self.q(table),
            self.q(COL_DUE),
            self.q(COL_MESSAGE_ID)
        )
    }

    /// Moves every staged row into the delayed table.
    pub fn promote(&self, delayed: &str, staging: &str) -> String {
        let columns = self.column_list(&MESSAGE_COLUMNS);
        format!(
            "INSERT INTO {} ({columns}) SELECT {columns} FROM {}",
            self.q(delayed),
            self.q(staging)
        )
    }

    /// Records how many rows `staging` holds for a batch. Binds: endpoint, batch number.
    pub fn record_promotion(&self, promotions: &str, staging: &str) -> String {
        format!(
            "INSERT INTO {} ({}) SELECT {}, {}, COUNT(*) FROM {}",
            self.q(promotions),
            self.column_list(&[COL_ENDPOINT, COL_BATCH_NUMBER, COL_PROMOTED]),
            self.p(0),
            self.dialect.get_bigint_placeholder(1),
            self.q(staging)
        )
    }

    /// Binds: endpoint, batch number.
    pub fn promoted_count(&self, promotions: &str) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = {} AND {} = {}",
            self.q(COL_PROMOTED),
            self.q(promotions),
            self.q(COL_ENDPOINT),
            self.p(0),
            self.q(COL_BATCH_NUMBER),
            self.p(1)
        )
    }

    /// Binds: endpoint, batch number.
    pub fn delete_promotion(&self, promotions: &str) -> String {
        format!(
            "DELETE FROM {} WHERE {} = {} AND {} = {}",
            self.q(promotions),
            self.q(COL_ENDPOINT),
            self.p(0),
            self.q(COL_BATCH_NUMBER),
            self.p(1)
        )
    }

    /// Binds: endpoint.
    pub fn delete_promotions(&self, promotions: &str) -> String {
        format!(
            "DELETE FROM {} WHERE {} = {}",
            self.q(promotions),
            self.q(COL_ENDPOINT),
            self.p(0)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::base::dialect::{MySql, Postgres};

    #[test]
    fn eligible_page_uses_keyset_paging() {
        let sql = QueryGenerator::new(&Postgres).eligible_page("TimeoutData", "Batches", 500);
        assert_eq!(
            sql,
            r#"SELECT t."Id" FROM "TimeoutData" t WHERE (t."OwningTimeoutManager" = $1 OR t."OwningTimeoutManager" = $2) AND t."Time" >= $3 AND t."Id" > $4 AND NOT EXISTS (SELECT 1 FROM "Batches" b WHERE b."TimeoutId" = t."Id") ORDER BY t."Id" LIMIT 500"#
        );
    }

    #[test]
    fn multi_row_insert_numbers_placeholders_sequentially() {
        let sql = QueryGenerator::new(&Postgres).insert_batch_members("B", 2);
        assert!(sql.ends_with("VALUES ($1, $2, $3), ($4, $5, $6)"));

        let sql = QueryGenerator::new(&MySql).insert_batch_members("B", 2);
        assert!(sql.ends_with("VALUES (?, ?, ?), (?, ?, ?)"));
    }

    #[test]
    fn restore_strips_the_hidden_prefix() {
        let sql = QueryGenerator::new(&MySql).restore_hidden("T", 44);
        assert_eq!(
            sql,
            "UPDATE `T` SET `OwningTimeoutManager` = SUBSTRING(`OwningTimeoutManager`, 45) \
             WHERE LEFT(`OwningTimeoutManager`, 44) = ?"
        );
    }

    #[test]
    fn tagging_keeps_the_endpoint_suffix() {
        let sql = QueryGenerator::new(&Postgres).tag_batch_timeouts("T", "B", 44);
        assert!(sql.contains(r#"= ($1 || substr("OwningTimeoutManager", 45))"#));
        assert!(sql.ends_with(r#"WHERE "BatchNumber" = $2)"#));
    }

    #[test]
    fn promotion_record_casts_the_batch_number() {
        let sql = QueryGenerator::new(&Postgres).record_promotion("P", "S");
        assert_eq!(
            sql,
            r#"INSERT INTO "P" ("Endpoint", "BatchNumber", "Promoted") SELECT $1, CAST($2 AS BIGINT), COUNT(*) FROM "S""#
        );
    }
}
