#[actix_web::main]
async fn main() -> std::io::Result<()> {
    eventscribe_lib::run().await
}
