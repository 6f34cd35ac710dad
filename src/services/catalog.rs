//! Catalog management service

use crate::{
    availability::adjust_total_copies,
    error::{AppError, AppResult},
    models::{
        book::{BookQuery, CreateBook, UpdateBook},
        BookDetails, Page,
    },
    repository::Repository,
};

#[derive(Clone)]
pub struct CatalogService {
    repository: Repository,
}

impl CatalogService {
    pub fn new(repository: Repository) -> Self {
        Self { repository }
    }

    /// Search books with filters
    pub async fn search_books(&self, query: &BookQuery, page: Page) -> AppResult<(Vec<BookDetails>, i64)> {
        self.repository.books.search(query, page).await
    }

    /// Get book by ID with derived fields
    pub async fn get_book(&self, id: i32) -> AppResult<BookDetails> {
        self.repository.books.get_details(id).await
    }

    /// Create a new book
    pub async fn create_book(&self, book: CreateBook) -> AppResult<BookDetails> {
        let created = self.repository.books.create(&book).await?;
        tracing::info!(
            "Book {} '{}' created with {} copies",
            created.id,
            created.title,
            created.total_copies
        );
        self.get_book(created.id).await
    }

    /// Update catalog fields; a new total shifts availability by the same delta
    pub async fn update_book(&self, id: i32, update: UpdateBook) -> AppResult<BookDetails> {
        let mut tx = self.repository.pool.begin().await?;
        let mut book = self.repository.books.lock(&mut *tx, id).await?;

        if let Some(title) = update.title {
            book.title = title.trim().to_string();
        }
        if let Some(author) = update.author {
            book.author = author.trim().to_string();
        }
        if let Some(isbn) = update.isbn {
            book.isbn = isbn.trim().to_string();
        }
        if let Some(total) = update.total_copies.filter(|t| *t != book.total_copies) {
            let previous = book.total_copies;
            adjust_total_copies(&mut book, total)?;
            tracing::info!(
                "Book {} total copies {} -> {}, {} available",
                book.id,
                previous,
                book.total_copies,
                book.available_copies
            );
        }

        self.repository.books.update(&mut *tx, &book).await?;
        tx.commit().await?;

        self.get_book(id).await
    }

    /// Delete a book; refused while any of its copies is on an active loan
    pub async fn delete_book(&self, id: i32) -> AppResult<()> {
        let mut tx = self.repository.pool.begin().await?;
        let book = self.repository.books.lock(&mut *tx, id).await?;

        let active = self
            .repository
            .loans
            .count_active_for_book(&mut *tx, book.id)
            .await?;
        if active > 0 {
            return Err(AppError::Validation(format!(
                "Cannot delete '{}': {} copies are on loan",
                book.title, active
            )));
        }

        self.repository.books.delete(&mut *tx, book.id).await?;
        tx.commit().await?;

        tracing::info!("Book {} '{}' deleted", book.id, book.title);
        Ok(())
    }
}
