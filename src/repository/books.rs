//! Books repository for database operations

use sqlx::{PgConnection, Pool, Postgres, QueryBuilder};

use super::contains_pattern;
use crate::{
    error::{AppError, AppResult, Entity},
    models::{
        book::{Book, BookDetails, BookQuery, CreateBook},
        Page,
    },
};

const BOOK_COLUMNS: &str =
    "id, title, author, isbn, total_copies, available_copies, created_at, updated_at";

const BOOK_DETAILS_SELECT: &str = r#"
    SELECT b.id, b.title, b.author, b.isbn, b.total_copies, b.available_copies,
           b.available_copies > 0 AS is_available,
           (SELECT COUNT(*) FROM loans l WHERE l.book_id = b.id) AS loan_count,
           b.created_at, b.updated_at
    FROM books b
    WHERE 1=1
"#;

#[derive(Clone)]
pub struct BooksRepository {
    pool: Pool<Postgres>,
}

impl BooksRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Get book by ID with derived catalog fields
    pub async fn get_details(&self, id: i32) -> AppResult<BookDetails> {
        let mut builder = QueryBuilder::<Postgres>::new(BOOK_DETAILS_SELECT);
        builder.push(" AND b.id = ").push_bind(id);

        builder
            .build_query_as::<BookDetails>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::not_found(Entity::Book, id))
    }

    /// Search books with pagination
    pub async fn search(&self, query: &BookQuery, page: Page) -> AppResult<(Vec<BookDetails>, i64)> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM books b WHERE 1=1");
        push_filters(&mut count, query);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut builder = QueryBuilder::<Postgres>::new(BOOK_DETAILS_SELECT);
        push_filters(&mut builder, query);
        builder
            .push(" ORDER BY b.title, b.author, b.id LIMIT ")
            .push_bind(page.limit())
            .push(" OFFSET ")
            .push_bind(page.offset());

        let books = builder
            .build_query_as::<BookDetails>()
            .fetch_all(&self.pool)
            .await?;

        Ok((books, total))
    }

    /// Create a new book; every copy starts available
    pub async fn create(&self, book: &CreateBook) -> AppResult<Book> {
        let created = sqlx::query_as::<_, Book>(&format!(
            r#"
            INSERT INTO books (title, author, isbn, total_copies, available_copies)
            VALUES ($1, $2, $3, $4, $4)
            RETURNING {}
            "#,
            BOOK_COLUMNS
        ))
        .bind(book.title.trim())
        .bind(book.author.trim())
        .bind(book.isbn.trim())
        .bind(book.total_copies)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    /// Load a book and lock its row until the transaction ends
    pub async fn lock(&self, conn: &mut PgConnection, id: i32) -> AppResult<Book> {
        sqlx::query_as::<_, Book>(&format!(
            "SELECT {} FROM books WHERE id = $1 FOR UPDATE",
            BOOK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| AppError::not_found(Entity::Book, id))
    }

    /// Write new availability, provided nobody changed it since it was read
    pub async fn store_availability(
        &self,
        conn: &mut PgConnection,
        book: &Book,
        expected_available: i32,
    ) -> AppResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE books
            SET available_copies = $2, updated_at = NOW()
            WHERE id = $1 AND available_copies = $3
            "#,
        )
        .bind(book.id)
        .bind(book.available_copies)
        .bind(expected_available)
        .execute(&mut *conn)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "Availability of book {} changed concurrently",
                book.id
            )));
        }
        Ok(())
    }

    /// Persist catalog fields and copy counts of a locked book
    pub async fn update(&self, conn: &mut PgConnection, book: &Book) -> AppResult<Book> {
        let updated = sqlx::query_as::<_, Book>(&format!(
            r#"
            UPDATE books
            SET title = $2, author = $3, isbn = $4,
                total_copies = $5, available_copies = $6, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            BOOK_COLUMNS
        ))
        .bind(book.id)
        .bind(&book.title)
        .bind(&book.author)
        .bind(&book.isbn)
        .bind(book.total_copies)
        .bind(book.available_copies)
        .fetch_one(&mut *conn)
        .await?;

        Ok(updated)
    }

    pub async fn delete(&self, conn: &mut PgConnection, id: i32) -> AppResult<()> {
        sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn count(&self) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM books")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &BookQuery) {
    if let Some(author) = query.author.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        builder.push(" AND b.author = ").push_bind(author.to_string());
    }

    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = contains_pattern(search);
        builder
            .push(" AND (b.title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR b.author ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR b.isbn ILIKE ")
            .push_bind(pattern)
            .push(")");
    }

    match query.available {
        Some(true) => {
            builder.push(" AND b.available_copies > 0");
        }
        Some(false) => {
            builder.push(" AND b.available_copies = 0");
        }
        None => {}
    }
}
